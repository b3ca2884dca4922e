use chrono::Utc;

use crate::crd::common::{
    Condition, ConditionSeverity, ConditionStatus, ConditionType,
};

pub const REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str =
    "WaitingForClusterInfrastructure";
pub const REASON_WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
pub const REASON_ASG_NOT_FOUND: &str = "ASGNotFound";
pub const REASON_ASG_PROVISION_FAILED: &str = "ASGProvisionFailed";
pub const REASON_ASG_DELETION_IN_PROGRESS: &str = "ASGDeletionInProgress";
pub const REASON_LAUNCH_TEMPLATE_RECONCILE_FAILED: &str =
    "LaunchTemplateReconcileFailed";
pub const REASON_SUBNETS_RECONCILIATION_FAILED: &str =
    "SubnetsReconciliationFailed";

pub fn get(conds: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conds.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conds: &[Condition], type_: ConditionType) -> bool {
    get(conds, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Upsert by type. The transition time only moves when the status flips.
pub fn set(conds: &mut Vec<Condition>, mut cond: Condition) {
    match conds.iter_mut().find(|c| c.type_ == cond.type_) {
        Some(existing) => {
            if existing.status == cond.status {
                cond.last_transition_time =
                    existing.last_transition_time.clone();
            }
            *existing = cond;
        }
        None => conds.push(cond),
    }
}

fn now() -> Option<String> {
    Some(Utc::now().to_rfc3339())
}

pub fn mark_true(conds: &mut Vec<Condition>, type_: ConditionType) {
    set(
        conds,
        Condition {
            type_,
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: now(),
        },
    );
}

pub fn mark_false(
    conds: &mut Vec<Condition>,
    type_: ConditionType,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    let message = message.into();
    set(
        conds,
        Condition {
            type_,
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: now(),
        },
    );
}

pub fn mark_unknown(
    conds: &mut Vec<Condition>,
    type_: ConditionType,
    reason: &str,
    message: impl Into<String>,
) {
    let message = message.into();
    set(
        conds,
        Condition {
            type_,
            status: ConditionStatus::Unknown,
            severity: None,
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: now(),
        },
    );
}

fn severity_rank(s: Option<ConditionSeverity>) -> u8 {
    match s {
        Some(ConditionSeverity::Error) => 3,
        Some(ConditionSeverity::Warning) => 2,
        Some(ConditionSeverity::Info) => 1,
        None => 0,
    }
}

/// Derive the Ready condition from `from`: true when all are true, otherwise
/// it mirrors the most severe false one, or unknown when some are missing.
pub fn summarize(conds: &mut Vec<Condition>, from: &[ConditionType]) {
    let worst = from
        .iter()
        .filter_map(|t| get(conds, *t))
        .filter(|c| c.status == ConditionStatus::False)
        .max_by_key(|c| severity_rank(c.severity))
        .cloned();
    if let Some(worst) = worst {
        mark_false(
            conds,
            ConditionType::Ready,
            worst.reason.as_deref().unwrap_or_default(),
            worst.severity.unwrap_or(ConditionSeverity::Info),
            worst.message.unwrap_or_default(),
        );
    } else if from.iter().all(|t| is_true(conds, *t)) {
        mark_true(conds, ConditionType::Ready);
    } else {
        mark_unknown(conds, ConditionType::Ready, "Pending", "");
    }
}
