use ipnet::{Ipv4Net, Ipv6Net};

/// Subnets handed to instances are always /64 in IPv6.
pub const IPV6_SUBNET_PREFIX: u8 = 64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid cidr {cidr:?}: {reason}")]
    Parse { cidr: String, reason: String },
    #[error("cannot split {cidr} into zero subnets")]
    ZeroParts { cidr: String },
    #[error("{cidr} is too small to split into {parts} subnets")]
    TooSmall { cidr: String, parts: usize },
}

/// Prefix bits needed to address `parts` equal blocks.
fn extra_bits(parts: usize) -> u8 {
    parts.next_power_of_two().trailing_zeros() as u8
}

/// Split `cidr` into `parts` equal blocks, taking the first `parts` of the
/// smallest power-of-two partition that fits.
pub fn split_ipv4(cidr: &str, parts: usize) -> Result<Vec<Ipv4Net>, CidrError> {
    let net: Ipv4Net = cidr.parse().map_err(|e| CidrError::Parse {
        cidr: cidr.to_string(),
        reason: format!("{e}"),
    })?;
    split_ipv4_net(net.trunc(), parts)
}

fn split_ipv4_net(net: Ipv4Net, parts: usize) -> Result<Vec<Ipv4Net>, CidrError> {
    if parts == 0 {
        return Err(CidrError::ZeroParts {
            cidr: net.to_string(),
        });
    }
    let too_small = || CidrError::TooSmall {
        cidr: net.to_string(),
        parts,
    };
    let prefix = net.prefix_len() + extra_bits(parts);
    let blocks = net.subnets(prefix).map_err(|_| too_small())?;
    Ok(blocks.take(parts).collect())
}

/// Equal split of an IPv6 block. Each result is the first /64 of its block, so
/// the parent must leave room for the extra bits above /64.
pub fn split_ipv6(cidr: &str, parts: usize) -> Result<Vec<Ipv6Net>, CidrError> {
    let net: Ipv6Net = cidr.parse().map_err(|e| CidrError::Parse {
        cidr: cidr.to_string(),
        reason: format!("{e}"),
    })?;
    split_ipv6_net(net.trunc(), parts)
}

fn split_ipv6_net(net: Ipv6Net, parts: usize) -> Result<Vec<Ipv6Net>, CidrError> {
    Ok(split_ipv6_blocks(net, parts)?
        .into_iter()
        .filter_map(|b| Ipv6Net::new(b.network(), IPV6_SUBNET_PREFIX).ok())
        .collect())
}

/// Equal split without narrowing to /64.
pub fn split_ipv6_blocks(
    net: Ipv6Net,
    parts: usize,
) -> Result<Vec<Ipv6Net>, CidrError> {
    if parts == 0 {
        return Err(CidrError::ZeroParts {
            cidr: net.to_string(),
        });
    }
    let prefix = net.prefix_len() + extra_bits(parts);
    if prefix > IPV6_SUBNET_PREFIX {
        return Err(CidrError::TooSmall {
            cidr: net.to_string(),
            parts,
        });
    }
    let blocks = net.subnets(prefix).map_err(|_| CidrError::TooSmall {
        cidr: net.to_string(),
        parts,
    })?;
    Ok(blocks.take(parts).collect())
}

/// Public/private layout of one address family: `zones + 1` top-level blocks,
/// one of which is split again into per-zone public blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout<N> {
    pub public: Vec<N>,
    pub private: Vec<N>,
}

/// IPv4: block 0 is carved into the public subnets, blocks 1..=zones are the
/// private ones.
pub fn layout_ipv4(cidr: &str, zones: usize) -> Result<Layout<Ipv4Net>, CidrError> {
    let top = split_ipv4(cidr, zones + 1)?;
    let public = split_ipv4_net(top[0], zones)?;
    Ok(Layout {
        public,
        private: top[1..].to_vec(),
    })
}

/// IPv6: the last block is carved into the public subnets, the leading blocks
/// are the private ones. Every range is narrowed to /64.
pub fn layout_ipv6(cidr: &str, zones: usize) -> Result<Layout<Ipv6Net>, CidrError> {
    let net: Ipv6Net = cidr.parse().map_err(|e| CidrError::Parse {
        cidr: cidr.to_string(),
        reason: format!("{e}"),
    })?;
    let top = split_ipv6_blocks(net.trunc(), zones + 1)?;
    let (last, leading) = top.split_last().ok_or(CidrError::ZeroParts {
        cidr: cidr.to_string(),
    })?;
    let public = split_ipv6_net(*last, zones)?;
    let private = leading
        .iter()
        .filter_map(|b| Ipv6Net::new(b.network(), IPV6_SUBNET_PREFIX).ok())
        .collect();
    Ok(Layout { public, private })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs<N: ToString>(nets: &[N]) -> Vec<String> {
        nets.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn splits_into_power_of_two_blocks() {
        let out = split_ipv4("10.0.0.0/16", 4).unwrap();
        assert_eq!(
            strs(&out),
            ["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
        let out = split_ipv4("10.0.0.0/16", 3).unwrap();
        assert_eq!(strs(&out), ["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18"]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            split_ipv4("10.0.0.0/33", 2),
            Err(CidrError::Parse { .. })
        ));
        assert!(matches!(
            split_ipv4("10.0.0.0/16", 0),
            Err(CidrError::ZeroParts { .. })
        ));
        assert!(matches!(
            split_ipv4("10.0.0.0/31", 4),
            Err(CidrError::TooSmall { .. })
        ));
    }

    #[test]
    fn ipv4_layout_for_three_zones_partitions_the_parent() {
        let layout = layout_ipv4("10.0.0.0/16", 3).unwrap();
        assert_eq!(
            strs(&layout.public),
            ["10.0.0.0/20", "10.0.16.0/20", "10.0.32.0/20"]
        );
        assert_eq!(
            strs(&layout.private),
            ["10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn ipv6_layout_keeps_public_in_the_last_block() {
        let layout = layout_ipv6("2001:db8:1234:1a00::/56", 2).unwrap();
        assert_eq!(
            strs(&layout.private),
            ["2001:db8:1234:1a00::/64", "2001:db8:1234:1a40::/64"]
        );
        assert_eq!(
            strs(&layout.public),
            ["2001:db8:1234:1a80::/64", "2001:db8:1234:1aa0::/64"]
        );
        for p in &layout.public {
            for q in &layout.private {
                assert!(!p.contains(q) && !q.contains(p));
            }
        }
    }

    #[test]
    fn ipv6_split_refuses_to_go_below_64() {
        assert!(matches!(
            split_ipv6("2001:db8::/63", 3),
            Err(CidrError::TooSmall { .. })
        ));
    }
}
