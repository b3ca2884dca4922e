use crate::crd::machine_pool::MixedInstancesPolicy;
pub use crate::tags::Tags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetState {
    Pending,
    Available,
}

/// IPv6 association of a subnet; only `associated` blocks count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Association {
    pub cidr_block: String,
    pub state: String,
}

pub const IPV6_ASSOCIATED: &str = "associated";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudSubnet {
    pub id: String,
    pub vpc_id: String,
    pub cidr_block: Option<String>,
    pub availability_zone: String,
    pub ipv6_associations: Vec<Ipv6Association>,
    pub map_public_ip_on_launch: bool,
    pub state: SubnetState,
    pub tags: Tags,
}

impl CloudSubnet {
    pub fn associated_ipv6(&self) -> Option<&str> {
        self.ipv6_associations
            .iter()
            .rev()
            .find(|a| a.state == IPV6_ASSOCIATED)
            .map(|a| a.cidr_block.as_str())
    }
}

/// Filter for DescribeSubnets. The VPC id wins over the cluster tag.
#[derive(Clone, Debug, Default)]
pub struct DescribeSubnetsInput {
    pub vpc_id: Option<String>,
    pub cluster_name: Option<String>,
    pub states: Vec<SubnetState>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateSubnetInput {
    pub vpc_id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    pub tags: Tags,
}

/// The provider accepts one attribute per ModifySubnetAttribute call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetAttribute {
    AssignIpv6AddressOnCreation(bool),
    MapPublicIpOnLaunch(bool),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
    pub main: bool,
    pub subnet_ids: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub destination_cidr_block: Option<String>,
    pub gateway_id: Option<String>,
    pub nat_gateway_id: Option<String>,
}

impl Route {
    pub fn targets_internet_gateway(&self) -> bool {
        self.gateway_id
            .as_deref()
            .is_some_and(|gw| gw.starts_with("igw"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NatGateway {
    pub id: String,
    pub subnet_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityZone {
    pub name: String,
    pub zone_type: String,
}

pub const ZONE_TYPE_AVAILABILITY_ZONE: &str = "availability-zone";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsgStatus {
    DeleteInProgress,
    Other(String),
}

impl AsgStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Delete in progress" => AsgStatus::DeleteInProgress,
            other => AsgStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AsgStatus::DeleteInProgress => "Delete in progress",
            AsgStatus::Other(s) => s.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub availability_zone: String,
}

/// What the provider reports for a scaling group. Rebuilt on every pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AutoScalingGroup {
    pub id: String,
    pub name: String,
    pub desired_capacity: Option<i32>,
    pub min_size: i32,
    pub max_size: i32,
    pub capacity_rebalance: bool,
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    pub currently_suspended_processes: Vec<String>,
    pub subnets: Vec<String>,
    pub status: Option<AsgStatus>,
    pub instances: Vec<Instance>,
    pub tags: Tags,
}

impl AutoScalingGroup {
    pub fn is_deleting(&self) -> bool {
        self.status == Some(AsgStatus::DeleteInProgress)
    }
}

/// Input of create/update calls, derived from the desired pool spec.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AsgSpec {
    pub name: String,
    pub min_size: i32,
    pub max_size: i32,
    /// None leaves the provider's desired capacity untouched
    pub desired_capacity: Option<i32>,
    pub capacity_rebalance: bool,
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    pub subnets: Vec<String>,
    pub launch_template: Option<LaunchTemplateRef>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchTemplateRequest {
    pub name: String,
    pub ami_id: String,
    pub instance_type: String,
    pub iam_instance_profile: Option<String>,
    pub ssh_key_name: Option<String>,
    pub user_data_secret: String,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateRef {
    pub id: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchTemplate {
    pub id: String,
    pub name: String,
    pub latest_version: String,
    pub ami_id: Option<String>,
}
