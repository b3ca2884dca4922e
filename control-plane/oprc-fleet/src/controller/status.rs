use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace};

/// Compare two status objects for material differences, ignoring condition
/// transition times that would otherwise cause endless patch loops.
pub fn should_patch_status<S: Serialize>(
    current: Option<&S>,
    desired: &S,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let cur_norm = normalize_status(cur);
            let des_norm = normalize_status(desired);
            let differs = cur_norm != des_norm;
            if differs {
                debug!(
                    "should_patch_status: status differs, patching\ncurrent={}\ndesired={}",
                    serde_json::to_string(&cur_norm).unwrap_or_default(),
                    serde_json::to_string(&des_norm).unwrap_or_default()
                );
            } else {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

pub fn normalize_status<S: Serialize>(s: &S) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        if let Some(JsonValue::Array(conds)) = map.get_mut("conditions") {
            for c in conds.iter_mut() {
                if let Some(obj) = c.as_object_mut() {
                    obj.remove("last_transition_time");
                }
            }
            // upsert order is not meaningful
            conds.sort_by(|a, b| {
                let at = a.get("type").and_then(|t| t.as_str()).unwrap_or("");
                let bt = b.get("type").and_then(|t| t.as_str()).unwrap_or("");
                at.cmp(bt)
            });
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::common::{Condition, ConditionStatus, ConditionType};
    use crate::crd::machine_pool::MachinePoolStatus;

    fn cond(type_: ConditionType, at: &str) -> Condition {
        Condition {
            type_,
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: Some(at.into()),
        }
    }

    #[test]
    fn transition_time_and_order_are_ignored() {
        let a = MachinePoolStatus {
            ready: true,
            conditions: Some(vec![
                cond(ConditionType::Ready, "2024-01-01T00:00:00Z"),
                cond(ConditionType::AsgReady, "2024-01-01T00:00:00Z"),
            ]),
            ..Default::default()
        };
        let b = MachinePoolStatus {
            ready: true,
            conditions: Some(vec![
                cond(ConditionType::AsgReady, "2025-06-01T00:00:00Z"),
                cond(ConditionType::Ready, "2025-06-01T00:00:00Z"),
            ]),
            ..Default::default()
        };
        assert!(!should_patch_status(Some(&a), &b));
    }

    #[test]
    fn material_changes_patch() {
        let a = MachinePoolStatus::default();
        let b = MachinePoolStatus {
            replicas: 2,
            ..Default::default()
        };
        assert!(should_patch_status(Some(&a), &b));
        assert!(should_patch_status(None, &a));
    }
}
