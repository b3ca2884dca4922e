use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::Condition;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.oaas.io",
    version = "v1alpha1",
    kind = "MachinePool",
    plural = "machinepools",
    shortname = "fmp",
    namespaced,
    status = "MachinePoolStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#
)]
pub struct MachinePoolSpec {
    /// Name of the FleetCluster (same namespace) providing network and readiness
    pub cluster_name: String,
    /// Minimum size of the autoscaling group
    #[serde(default)]
    pub min_size: i32,
    /// Maximum size of the autoscaling group
    #[serde(default = "default_max_size")]
    pub max_size: i32,
    /// Desired instance count. Left to an external autoscaler when the
    /// replicas-managed-by annotation says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Enable capacity rebalancing for spot instances
    #[serde(default)]
    pub capacity_rebalance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// Scaling processes that should be suspended on the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_processes: Option<SuspendProcessesTypes>,
    /// Set once the group identity is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_id_list: Vec<String>,
    #[serde(default)]
    pub bootstrap: Bootstrap,
    /// Explicit subnet ids; when empty the cluster's private subnets are used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    /// Restrict subnet selection to these zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub launch_template: LaunchTemplateSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct MachinePoolStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// Terminal failure recorded by an earlier pass; reconciliation is skipped
    /// until an operator clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asg_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_template_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct Bootstrap {
    /// Secret holding the instance user data; None until bootstrap is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct LaunchTemplateSpec {
    /// Image id; discovered from the provider when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_id: Option<String>,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct MixedInstancesPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_distribution: Option<InstancesDistribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<InstanceOverride>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct InstancesDistribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_allocation_strategy: Option<OnDemandAllocationStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_allocation_strategy: Option<SpotAllocationStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_base_capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_percentage_above_base_capacity: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OnDemandAllocationStrategy {
    Prioritized,
    LowestPrice,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SpotAllocationStrategy {
    LowestPrice,
    CapacityOptimized,
    CapacityOptimizedPrioritized,
    PriceCapacityOptimized,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct InstanceOverride {
    pub instance_type: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct SuspendProcessesTypes {
    /// Suspend every known process, except the ones explicitly set to false
    #[serde(default)]
    pub all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<Processes>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct Processes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_load_balancer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_notification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub az_rebalance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_refresh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_unhealthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_actions: Option<bool>,
}

fn default_max_size() -> i32 {
    1
}

fn default_instance_type() -> String {
    "t3.large".into()
}
