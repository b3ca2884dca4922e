use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::Condition;
use crate::tags::{self, ResourceLifecycle, Tags};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.oaas.io",
    version = "v1alpha1",
    kind = "FleetCluster",
    plural = "fleetclusters",
    shortname = "fcl",
    namespaced,
    status = "FleetClusterStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"VPC","type":"string","jsonPath":".spec.network.vpc.id"}"#
)]
pub struct FleetClusterSpec {
    pub network: NetworkSpec,
    /// Tags stamped on every managed cloud resource of this cluster
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: Tags,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct FleetClusterStatus {
    /// Set once the network is reconciled; machine pools wait on it
    #[serde(default)]
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct NetworkSpec {
    #[serde(default)]
    pub vpc: VpcSpec,
    /// Declared subnets. Filled with the default layout when left empty on a
    /// managed network, then kept in sync with what exists in the cloud.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct VpcSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_vpc_cidr")]
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_cidr_block: Option<String>,
    /// Upper bound of zones used for the default layout (3 when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone_usage_limit: Option<usize>,
    #[serde(default)]
    pub availability_zone_selection: AzSelectionScheme,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct Ipv6Spec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq,
)]
pub enum AzSelectionScheme {
    #[default]
    Ordered,
    Random,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct SubnetSpec {
    /// Cloud id; empty until the subnet exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_cidr_block: Option<String>,
    pub availability_zone: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_ipv6: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl VpcSpec {
    /// An existing VPC that does not carry this cluster's ownership tag was
    /// brought by the user and must not be altered beyond tagging.
    pub fn is_unmanaged(&self, cluster_name: &str) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
            && self.tags.get(&tags::cluster_owned_key(cluster_name))
                != Some(&ResourceLifecycle::Owned.to_string())
    }

    pub fn ipv6_cidr(&self) -> Option<&str> {
        self.ipv6.as_ref().and_then(|v| v.cidr_block.as_deref())
    }

    pub fn is_ipv6_enabled(&self) -> bool {
        self.ipv6.is_some()
    }
}

impl SubnetSpec {
    /// Subnets are the same subnet when cidr and zone agree, whatever their id.
    pub fn matches(&self, other: &SubnetSpec) -> bool {
        self.cidr_block == other.cidr_block
            && self.availability_zone == other.availability_zone
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

pub fn find_matching<'a>(
    subnets: &'a [SubnetSpec],
    wanted: &SubnetSpec,
) -> Option<&'a SubnetSpec> {
    subnets.iter().find(|s| s.matches(wanted))
}

fn default_vpc_cidr() -> String {
    "10.0.0.0/16".into()
}
