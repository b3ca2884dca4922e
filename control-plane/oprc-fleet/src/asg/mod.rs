pub mod diff;
pub mod processes;


pub use diff::{needs_update, subnets_changed, sync_external_replicas};
pub use processes::{ALL_PROCESSES, ProcessDelta, process_delta};

use std::collections::BTreeMap;

use crate::cloud::{AsgSpec, LaunchTemplateRef, Tags};
use crate::crd::cluster::NetworkSpec;
use crate::crd::machine_pool::MachinePoolSpec;

/// Annotation naming who owns the pool's replica count.
pub const REPLICAS_MANAGED_BY_ANNOTATION: &str =
    "fleet.oaas.io/replicas-managed-by";
pub const EXTERNAL_AUTOSCALER: &str = "external-autoscaler";

pub fn replicas_externally_managed(
    annotations: Option<&BTreeMap<String, String>>,
) -> bool {
    annotations
        .and_then(|a| a.get(REPLICAS_MANAGED_BY_ANNOTATION))
        .is_some_and(|v| v == EXTERNAL_AUTOSCALER)
}

/// Explicit subnet ids on the pool, else the cluster's known private subnets
/// restricted to the pool's zones when it lists any.
pub fn default_subnet_ids(
    pool: &MachinePoolSpec,
    network: &NetworkSpec,
) -> Vec<String> {
    if !pool.subnets.is_empty() {
        return pool.subnets.clone();
    }
    network
        .subnets
        .iter()
        .filter(|s| !s.is_public)
        .filter(|s| {
            pool.availability_zones.is_empty()
                || pool.availability_zones.contains(&s.availability_zone)
        })
        .filter_map(|s| s.id().map(str::to_string))
        .collect()
}

/// Create/update input for the pool's group. The desired capacity is left out
/// when an external autoscaler owns it.
pub fn asg_spec(
    name: &str,
    pool: &MachinePoolSpec,
    externally_managed: bool,
    subnets: Vec<String>,
    launch_template: Option<LaunchTemplateRef>,
    tags: Tags,
) -> AsgSpec {
    AsgSpec {
        name: name.to_string(),
        min_size: pool.min_size,
        max_size: pool.max_size,
        desired_capacity: if externally_managed {
            None
        } else {
            pool.replicas
        },
        capacity_rebalance: pool.capacity_rebalance,
        mixed_instances_policy: pool.mixed_instances_policy.clone(),
        subnets,
        launch_template,
        tags,
    }
}
