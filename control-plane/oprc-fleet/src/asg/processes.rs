use std::collections::BTreeSet;

use crate::crd::machine_pool::{Processes, SuspendProcessesTypes};

/// Every scaling process the provider knows, in its documented order.
pub const ALL_PROCESSES: [&str; 9] = [
    "Launch",
    "Terminate",
    "AddToLoadBalancer",
    "AlarmNotification",
    "AZRebalance",
    "HealthCheck",
    "InstanceRefresh",
    "ReplaceUnhealthy",
    "ScheduledActions",
];

impl Processes {
    fn entries(&self) -> [(&'static str, Option<bool>); 9] {
        [
            (ALL_PROCESSES[0], self.launch),
            (ALL_PROCESSES[1], self.terminate),
            (ALL_PROCESSES[2], self.add_to_load_balancer),
            (ALL_PROCESSES[3], self.alarm_notification),
            (ALL_PROCESSES[4], self.az_rebalance),
            (ALL_PROCESSES[5], self.health_check),
            (ALL_PROCESSES[6], self.instance_refresh),
            (ALL_PROCESSES[7], self.replace_unhealthy),
            (ALL_PROCESSES[8], self.scheduled_actions),
        ]
    }
}

/// Processes the directive asks to keep suspended. With `all` set every known
/// process is included unless explicitly set to false; otherwise only the
/// ones explicitly set to true.
pub fn resolve(directive: Option<&SuspendProcessesTypes>) -> BTreeSet<String> {
    let Some(directive) = directive else {
        return BTreeSet::new();
    };
    let processes = directive.processes.clone().unwrap_or_default();
    processes
        .entries()
        .into_iter()
        .filter(|(_, flag)| {
            if directive.all {
                *flag != Some(false)
            } else {
                *flag == Some(true)
            }
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Calls needed to move the group's suspended set onto the desired one.
/// Both lists are deduplicated and in lexical order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessDelta {
    pub to_suspend: Vec<String>,
    pub to_resume: Vec<String>,
}

impl ProcessDelta {
    pub fn is_empty(&self) -> bool {
        self.to_suspend.is_empty() && self.to_resume.is_empty()
    }
}

pub fn process_delta(
    desired: &BTreeSet<String>,
    observed: &[String],
) -> ProcessDelta {
    let observed: BTreeSet<String> = observed.iter().cloned().collect();
    ProcessDelta {
        to_suspend: desired.difference(&observed).cloned().collect(),
        to_resume: observed.difference(desired).cloned().collect(),
    }
}
