use std::collections::BTreeSet;

use super::processes;
use crate::cloud::AutoScalingGroup;
use crate::crd::machine_pool::MachinePoolSpec;

/// Whether the observed group has drifted from the pool spec. Checked in a
/// fixed order; the first mismatch wins. When `externally_managed` is set the
/// replica count belongs to an external autoscaler and is not compared.
pub fn needs_update(
    pool: &MachinePoolSpec,
    externally_managed: bool,
    asg: &AutoScalingGroup,
) -> bool {
    if !externally_managed
        && pool.replicas.unwrap_or(0) != asg.desired_capacity.unwrap_or(0)
    {
        return true;
    }
    if pool.max_size != asg.max_size {
        return true;
    }
    if pool.min_size != asg.min_size {
        return true;
    }
    if pool.capacity_rebalance != asg.capacity_rebalance {
        return true;
    }
    // an empty policy is still a policy
    if pool.mixed_instances_policy != asg.mixed_instances_policy {
        return true;
    }
    let desired = processes::resolve(pool.suspend_processes.as_ref());
    let observed: BTreeSet<String> =
        asg.currently_suspended_processes.iter().cloned().collect();
    desired != observed
}

/// Order-independent comparison of subnet id lists.
pub fn subnets_changed(desired: &[String], observed: &[String]) -> bool {
    let mut desired = desired.to_vec();
    let mut observed = observed.to_vec();
    desired.sort();
    observed.sort();
    desired != observed
}

/// Sync point for externally managed pools: copies the group's desired
/// capacity into the pool's replica count when they diverge. This is the only
/// place observed state flows back into the desired spec; the caller must
/// persist the spec when it returns true.
pub fn sync_external_replicas(
    pool: &mut MachinePoolSpec,
    asg: &AutoScalingGroup,
) -> bool {
    if pool.replicas.unwrap_or(0) == asg.desired_capacity.unwrap_or(0) {
        return false;
    }
    pool.replicas = asg.desired_capacity;
    true
}
