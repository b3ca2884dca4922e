use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::{debug, info, instrument, trace, warn};

use super::NetworkError;
use super::cidr::{layout_ipv4, layout_ipv6, split_ipv4};
use crate::cloud::retry::{Backoff, with_retry};
use crate::cloud::{
    CloudSubnet, CreateSubnetInput, DescribeSubnetsInput, ErrorCode,
    NetworkApi, RouteTable, SubnetAttribute, SubnetState,
    ZONE_TYPE_AVAILABILITY_ZONE,
};
use crate::controller::events::*;
use crate::crd::cluster::{
    AzSelectionScheme, NetworkSpec, SubnetSpec, VpcSpec, find_matching,
};
use crate::tags::{
    self, BuildParams, ELB_ROLE_TAG, INTERNAL_ELB_ROLE_TAG, NAME_TAG,
    PRIVATE_ROLE, PUBLIC_ROLE, ResourceLifecycle, TagReconciler, Tags,
};

pub const DEFAULT_MAX_ZONES: usize = 3;
/// Resource id used for tag params before the provider has assigned one.
const TEMPORARY_RESOURCE_ID: &str = "temporary-resource-id";
const MAIN_ROUTE_TABLE_KEY: &str = "vpc-main-route-table";

/// Narrow the region's zones to at most `limit`, picking them by `scheme`.
/// Zones are returned untouched when the region has no more than `limit`.
pub fn select_zones(
    mut zones: Vec<String>,
    limit: usize,
    scheme: AzSelectionScheme,
) -> Vec<String> {
    if zones.len() > limit {
        match scheme {
            AzSelectionScheme::Random => zones.shuffle(&mut rand::rng()),
            AzSelectionScheme::Ordered => zones.sort(),
        }
        zones.truncate(limit);
    }
    zones
}

/// Default layout for a managed network: one public and one private subnet per
/// zone, dual stack when the VPC has an IPv6 block.
pub fn plan_default_subnets(
    vpc: &VpcSpec,
    zones: &[String],
) -> Result<Vec<SubnetSpec>, NetworkError> {
    if zones.is_empty() {
        return Err(NetworkError::Config(
            "no availability zones to place default subnets in".into(),
        ));
    }
    let v4 = layout_ipv4(&vpc.cidr_block, zones.len())?;
    let v6 = match vpc.ipv6_cidr() {
        Some(cidr) => Some(layout_ipv6(cidr, zones.len())?),
        None if vpc.is_ipv6_enabled() => {
            return Err(NetworkError::Config(
                "ipv6 is enabled but the vpc has no ipv6 cidr block".into(),
            ));
        }
        None => None,
    };

    let mut subnets = Vec::with_capacity(zones.len() * 2);
    for (i, zone) in zones.iter().enumerate() {
        let mut public = SubnetSpec {
            cidr_block: v4.public[i].to_string(),
            availability_zone: zone.clone(),
            is_public: true,
            ..Default::default()
        };
        let mut private = SubnetSpec {
            cidr_block: v4.private[i].to_string(),
            availability_zone: zone.clone(),
            is_public: false,
            ..Default::default()
        };
        if let Some(v6) = &v6 {
            public.ipv6_cidr_block = Some(v6.public[i].to_string());
            public.is_ipv6 = true;
            private.ipv6_cidr_block = Some(v6.private[i].to_string());
            private.is_ipv6 = true;
        }
        subnets.push(public);
        subnets.push(private);
    }
    Ok(subnets)
}

/// Private subnets carved out of the secondary CIDR, one per zone.
pub fn plan_secondary_subnets(
    secondary_cidr: &str,
    zones: &[String],
) -> Result<Vec<SubnetSpec>, NetworkError> {
    let blocks = split_ipv4(secondary_cidr, zones.len())?;
    Ok(blocks
        .iter()
        .zip(zones)
        .map(|(block, zone)| SubnetSpec {
            cidr_block: block.to_string(),
            availability_zone: zone.clone(),
            is_public: false,
            tags: Tags::from([(
                tags::ASSOCIATION_TAG.to_string(),
                tags::SECONDARY_ASSOCIATION.to_string(),
            )]),
            ..Default::default()
        })
        .collect())
}

/// Subnet reconciliation for one cluster's network.
pub struct SubnetService<'a> {
    api: &'a dyn NetworkApi,
    events: &'a dyn EventSink,
    backoff: Backoff,
    cluster_name: String,
    tag_unmanaged: bool,
    additional_tags: Tags,
}

impl<'a> SubnetService<'a> {
    pub fn new(
        api: &'a dyn NetworkApi,
        events: &'a dyn EventSink,
        backoff: Backoff,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            api,
            events,
            backoff,
            cluster_name: cluster_name.into(),
            tag_unmanaged: false,
            additional_tags: Tags::new(),
        }
    }

    pub fn tag_unmanaged(mut self, enabled: bool) -> Self {
        self.tag_unmanaged = enabled;
        self
    }

    pub fn additional_tags(mut self, tags: Tags) -> Self {
        self.additional_tags = tags;
        self
    }

    async fn warn(&self, reason: &str, note: String) {
        self.events
            .publish(EventKind::Warning, reason, "ReconcileSubnets", note)
            .await;
    }

    async fn normal(&self, reason: &str, note: String) {
        self.events
            .publish(EventKind::Normal, reason, "ReconcileSubnets", note)
            .await;
    }

    /// Zones usable for subnets in the region, in provider order.
    pub async fn available_zones(&self) -> Result<Vec<String>, NetworkError> {
        let zones = self
            .api
            .describe_availability_zones()
            .await
            .map_err(NetworkError::cloud("failed to describe availability zones"))?;
        Ok(zones
            .into_iter()
            .filter(|z| z.zone_type == ZONE_TYPE_AVAILABILITY_ZONE)
            .map(|z| z.name)
            .collect())
    }

    async fn selected_zones(
        &self,
        vpc: &VpcSpec,
    ) -> Result<Vec<String>, NetworkError> {
        let zones = self.available_zones().await?;
        let limit = vpc.availability_zone_usage_limit.unwrap_or(DEFAULT_MAX_ZONES);
        let selected =
            select_zones(zones, limit, vpc.availability_zone_selection);
        debug!(cluster = %self.cluster_name, zones = ?selected, "zones selected");
        Ok(selected)
    }

    /// Converge the declared subnets onto the cloud. `network.subnets` is
    /// updated in place with what was observed or created, including when the
    /// pass fails half way, so the caller should persist it either way.
    #[instrument(skip_all, fields(cluster = %self.cluster_name))]
    pub async fn reconcile_subnets(
        &self,
        network: &mut NetworkSpec,
    ) -> Result<(), NetworkError> {
        info!("Reconciling subnets");
        let vpc = network.vpc.clone();
        let unmanaged = vpc.is_unmanaged(&self.cluster_name);
        let existing = self.describe_vpc_subnets(&vpc).await?;

        if network.subnets.is_empty() {
            if unmanaged {
                let msg = "no subnets specified, you must specify the subnets when using an unmanaged vpc";
                self.warn(REASON_FAILED_NO_SUBNETS, msg.to_string()).await;
                return Err(NetworkError::Config(msg.into()));
            }
            info!("no subnets specified, setting defaults");
            let zones = self.selected_zones(&vpc).await?;
            network.subnets = match plan_default_subnets(&vpc, &zones) {
                Ok(defaults) => defaults,
                Err(e) => {
                    self.warn(
                        REASON_FAILED_DEFAULT_SUBNETS,
                        format!("Failed getting default subnets: {e}"),
                    )
                    .await;
                    return Err(e);
                }
            };
        }

        if let Some(secondary) = vpc.secondary_cidr_block.as_deref() {
            let zones = self.selected_zones(&vpc).await?;
            for sub in plan_secondary_subnets(secondary, &zones)? {
                if find_matching(&existing, &sub).is_none()
                    && find_matching(&network.subnets, &sub).is_none()
                {
                    network.subnets.push(sub);
                }
            }
        }

        for sub in network.subnets.iter_mut() {
            let Some(observed) = find_matching(&existing, sub) else {
                if unmanaged {
                    self.warn(
                        REASON_FAILED_MATCH_SUBNET,
                        format!(
                            "Using unmanaged VPC and failed to find existing subnet for specified subnet id {:?}, cidr {:?}",
                            sub.id(),
                            sub.cidr_block
                        ),
                    )
                    .await;
                    return Err(NetworkError::Config(format!(
                        "using unmanaged vpc and subnet {:?} (cidr {}) specified but it doesn't exist in vpc {:?}",
                        sub.id(),
                        sub.cidr_block,
                        vpc.id
                    )));
                }
                continue;
            };

            if let Err(e) = self.ensure_subnet_tags(unmanaged, observed, &sub.tags).await {
                let id = observed.id().unwrap_or_default();
                if !unmanaged {
                    self.warn(
                        REASON_FAILED_TAG_SUBNET,
                        format!("Failed tagging managed Subnet {id:?}: {e}"),
                    )
                    .await;
                    return Err(NetworkError::cloud(format!(
                        "failed to ensure tags on subnet {id:?}"
                    ))(e));
                }
                // tagging someone else's subnet may simply not be permitted
                warn!(subnet = %id, error = %e, "failed tagging unmanaged subnet");
                self.warn(
                    REASON_FAILED_TAG_SUBNET,
                    format!("Failed tagging unmanaged Subnet {id:?}: {e}"),
                )
                .await;
            }

            merge_observed(sub, observed);
        }

        if unmanaged {
            if network.subnets.is_empty() {
                self.warn(
                    REASON_FAILED_NO_SUBNET,
                    "Expected at least 1 subnet but got 0".into(),
                )
                .await;
                return Err(NetworkError::Config(
                    "expected at least 1 subnet but got 0".into(),
                ));
            }
        } else {
            if !network.subnets.iter().any(|s| !s.is_public) {
                self.warn(
                    REASON_FAILED_NO_PRIVATE_SUBNET,
                    "Expected at least 1 private subnet but got 0".into(),
                )
                .await;
                return Err(NetworkError::Config(
                    "expected at least 1 private subnet but got 0".into(),
                ));
            }
            if !network.subnets.iter().any(|s| s.is_public) {
                self.warn(
                    REASON_FAILED_NO_PUBLIC_SUBNET,
                    "Expected at least 1 public subnet but got 0".into(),
                )
                .await;
                return Err(NetworkError::Config(
                    "expected at least 1 public subnet but got 0".into(),
                ));
            }

            for sub in network.subnets.iter_mut() {
                if sub.id().is_some() {
                    continue;
                }
                let created = self.create_subnet(&vpc, sub).await?;
                *sub = created;
            }
        }

        debug!(subnets = network.subnets.len(), "reconciled subnets");
        Ok(())
    }

    async fn ensure_subnet_tags(
        &self,
        unmanaged: bool,
        observed: &SubnetSpec,
        manual: &Tags,
    ) -> Result<(), crate::cloud::CloudError> {
        if unmanaged && !self.tag_unmanaged {
            return Ok(());
        }
        let params = self.subnet_tag_params(
            unmanaged,
            observed.id().unwrap_or_default(),
            observed.is_public,
            &observed.availability_zone,
            manual,
        );
        let reconciler = TagReconciler::new(self.api);
        with_retry(&self.backoff, &[ErrorCode::SubnetNotFound], || {
            reconciler.ensure(&params, &observed.tags)
        })
        .await
        .map(|_| ())
    }

    /// Tag params for a subnet. Unmanaged networks only ever get the shared
    /// tags, and only when tagging them is enabled.
    pub fn subnet_tag_params(
        &self,
        unmanaged: bool,
        id: &str,
        public: bool,
        zone: &str,
        manual: &Tags,
    ) -> BuildParams {
        let mut additional = Tags::new();
        let role = if public { PUBLIC_ROLE } else { PRIVATE_ROLE };

        if !unmanaged || self.tag_unmanaged {
            additional = self.additional_tags.clone();
            let lb_tag = if public {
                ELB_ROLE_TAG
            } else {
                INTERNAL_ELB_ROLE_TAG
            };
            additional.insert(lb_tag.to_string(), "1".to_string());
            additional.insert(
                tags::cloud_provider_key(&self.cluster_name),
                ResourceLifecycle::Shared.to_string(),
            );
        }

        if unmanaged {
            return BuildParams {
                resource_id: id.to_string(),
                additional,
                ..Default::default()
            };
        }

        additional.extend(manual.iter().map(|(k, v)| (k.clone(), v.clone())));
        let name = match manual.get(NAME_TAG) {
            Some(name) => name.clone(),
            None => format!("{}-subnet-{role}-{zone}", self.cluster_name),
        };
        BuildParams {
            cluster_name: Some(self.cluster_name.clone()),
            resource_id: id.to_string(),
            lifecycle: Some(ResourceLifecycle::Owned),
            name: Some(name),
            role: Some(role.to_string()),
            additional,
        }
    }

    async fn describe_subnets(
        &self,
        vpc: &VpcSpec,
    ) -> Result<Vec<CloudSubnet>, NetworkError> {
        let input = DescribeSubnetsInput {
            vpc_id: vpc.id.clone().filter(|id| !id.is_empty()),
            cluster_name: Some(self.cluster_name.clone()),
            states: vec![SubnetState::Pending, SubnetState::Available],
        };
        match self.api.describe_subnets(&input).await {
            Ok(out) => Ok(out),
            Err(e) => {
                let vpc_id = vpc.id.clone().unwrap_or_default();
                self.normal(
                    REASON_FAILED_DESCRIBE_SUBNET,
                    format!("Failed to describe subnets in vpc {vpc_id:?}: {e}"),
                )
                .await;
                Err(NetworkError::cloud(format!(
                    "failed to describe subnets in vpc {vpc_id:?}"
                ))(e))
            }
        }
    }

    /// Observed subnets of the VPC, classified public/private from their role
    /// tag or from an internet-gateway route.
    pub async fn describe_vpc_subnets(
        &self,
        vpc: &VpcSpec,
    ) -> Result<Vec<SubnetSpec>, NetworkError> {
        let subnets = self.describe_subnets(vpc).await?;

        let mut route_tables: HashMap<String, RouteTable> = HashMap::new();
        let mut nat_gateways: HashMap<String, String> = HashMap::new();
        if let Some(vpc_id) = vpc.id.as_deref().filter(|id| !id.is_empty()) {
            let tables = self
                .api
                .describe_route_tables(vpc_id)
                .await
                .map_err(NetworkError::cloud(format!(
                    "failed to describe route tables in vpc {vpc_id:?}"
                )))?;
            for rt in tables {
                if rt.main {
                    route_tables.insert(MAIN_ROUTE_TABLE_KEY.into(), rt.clone());
                }
                for subnet_id in &rt.subnet_ids {
                    route_tables.insert(subnet_id.clone(), rt.clone());
                }
            }
            let ngws = self
                .api
                .describe_nat_gateways(vpc_id)
                .await
                .map_err(NetworkError::cloud(format!(
                    "failed to describe nat gateways in vpc {vpc_id:?}"
                )))?;
            for ngw in ngws {
                nat_gateways.insert(ngw.subnet_id, ngw.id);
            }
        }

        Ok(subnets
            .into_iter()
            .map(|sn| {
                let mut spec = SubnetSpec {
                    id: Some(sn.id.clone()),
                    cidr_block: sn.cidr_block.clone().unwrap_or_default(),
                    availability_zone: sn.availability_zone.clone(),
                    tags: sn.tags.clone(),
                    ..Default::default()
                };
                if let Some(v6) = sn.associated_ipv6() {
                    spec.ipv6_cidr_block = Some(v6.to_string());
                    spec.is_ipv6 = true;
                }
                if spec.tags.get(tags::ROLE_TAG).map(String::as_str)
                    == Some(PUBLIC_ROLE)
                {
                    spec.is_public = true;
                }
                let rt = route_tables
                    .get(&sn.id)
                    .or_else(|| route_tables.get(MAIN_ROUTE_TABLE_KEY));
                if let Some(rt) = rt {
                    spec.route_table_id = Some(rt.id.clone());
                    if rt.routes.iter().any(|r| r.targets_internet_gateway()) {
                        spec.is_public = true;
                    }
                }
                spec.nat_gateway_id = nat_gateways.get(&sn.id).cloned();
                spec
            })
            .collect())
    }

    /// Create one managed subnet, wait for it, then set its launch attributes.
    pub async fn create_subnet(
        &self,
        vpc: &VpcSpec,
        sn: &SubnetSpec,
    ) -> Result<SubnetSpec, NetworkError> {
        let Some(vpc_id) = vpc.id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(NetworkError::Config(format!(
                "cannot create subnet {} before the vpc id is known",
                sn.cidr_block
            )));
        };
        let params = self.subnet_tag_params(
            false,
            TEMPORARY_RESOURCE_ID,
            sn.is_public,
            &sn.availability_zone,
            &sn.tags,
        );
        let ipv6 = vpc.is_ipv6_enabled();
        let input = CreateSubnetInput {
            vpc_id: vpc_id.to_string(),
            cidr_block: sn.cidr_block.clone(),
            ipv6_cidr_block: if ipv6 { sn.ipv6_cidr_block.clone() } else { None },
            availability_zone: sn.availability_zone.clone(),
            tags: tags::build_tags(&params),
        };

        let out = match self.api.create_subnet(&input).await {
            Ok(out) => out,
            Err(e) => {
                self.warn(
                    REASON_FAILED_CREATE_SUBNET,
                    format!("Failed creating new managed Subnet {e}"),
                )
                .await;
                return Err(NetworkError::cloud("failed to create subnet")(e));
            }
        };
        let id = out.id.clone();
        self.normal(
            REASON_SUCCESSFUL_CREATE_SUBNET,
            format!("Created new managed Subnet {id:?}"),
        )
        .await;
        info!(subnet = %id, public = sn.is_public, az = %sn.availability_zone, cidr = %sn.cidr_block, ipv6, "Created subnet");

        self.api
            .wait_until_subnet_available(&id)
            .await
            .map_err(NetworkError::cloud(format!(
                "failed to wait for subnet {id:?}"
            )))?;

        // the provider only accepts one attribute per call
        if ipv6 {
            self.set_attribute(&id, SubnetAttribute::AssignIpv6AddressOnCreation(true))
                .await?;
        }
        if sn.is_public {
            self.set_attribute(&id, SubnetAttribute::MapPublicIpOnLaunch(true))
                .await?;
        }

        let mut created = SubnetSpec {
            id: Some(id),
            cidr_block: out.cidr_block.clone().unwrap_or_else(|| sn.cidr_block.clone()),
            availability_zone: out.availability_zone.clone(),
            is_public: sn.is_public,
            tags: sn.tags.clone(),
            ..Default::default()
        };
        if let Some(v6) = out.associated_ipv6() {
            created.ipv6_cidr_block = Some(v6.to_string());
            created.is_ipv6 = true;
        }
        debug!(subnet = ?created.id, vpc = %vpc_id, cidr = %created.cidr_block, ipv6_cidr = ?created.ipv6_cidr_block, az = %created.availability_zone, "Created new subnet in VPC");
        Ok(created)
    }

    async fn set_attribute(
        &self,
        id: &str,
        attribute: SubnetAttribute,
    ) -> Result<(), NetworkError> {
        let res = with_retry(&self.backoff, &[ErrorCode::SubnetNotFound], || {
            self.api.modify_subnet_attribute(id, attribute)
        })
        .await;
        match res {
            Ok(()) => {
                self.normal(
                    REASON_SUCCESSFUL_MODIFY_SUBNET,
                    format!("Modified managed Subnet {id:?} attributes"),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                self.warn(
                    REASON_FAILED_MODIFY_SUBNET,
                    format!("Failed modifying managed Subnet {id:?} attributes: {e}"),
                )
                .await;
                Err(NetworkError::cloud(format!(
                    "failed to set subnet {id:?} attribute {attribute:?}"
                ))(e))
            }
        }
    }

    /// Remove every subnet of a managed VPC. Unmanaged networks are left alone.
    #[instrument(skip_all, fields(cluster = %self.cluster_name))]
    pub async fn delete_subnets(&self, vpc: &VpcSpec) -> Result<(), NetworkError> {
        if vpc.is_unmanaged(&self.cluster_name) {
            trace!("Skipping subnets deletion in unmanaged mode");
            return Ok(());
        }
        for sn in self.describe_subnets(vpc).await? {
            if let Err(e) = self.api.delete_subnet(&sn.id).await {
                self.warn(
                    REASON_FAILED_DELETE_SUBNET,
                    format!("Failed to delete managed Subnet {:?}: {e}", sn.id),
                )
                .await;
                return Err(NetworkError::cloud(format!(
                    "failed to delete subnet {:?}",
                    sn.id
                ))(e));
            }
            info!(subnet = %sn.id, vpc = ?vpc.id, "Deleted subnet");
            self.normal(
                REASON_SUCCESSFUL_DELETE_SUBNET,
                format!("Deleted managed Subnet {:?}", sn.id),
            )
            .await;
        }
        Ok(())
    }
}

/// Copy what the cloud reports onto the declared entry. Declared tags stay.
fn merge_observed(desired: &mut SubnetSpec, observed: &SubnetSpec) {
    desired.id = observed.id.clone();
    desired.route_table_id = observed.route_table_id.clone();
    desired.nat_gateway_id = observed.nat_gateway_id.clone();
    desired.is_public = observed.is_public;
    desired.is_ipv6 = observed.is_ipv6;
    desired.ipv6_cidr_block = observed.ipv6_cidr_block.clone();
}
