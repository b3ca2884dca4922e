use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

pub const REASON_FAILED_LAUNCH_TEMPLATE: &str = "FailedLaunchTemplateReconcile";
pub const REASON_FAILED_CREATE: &str = "FailedCreate";
pub const REASON_FAILED_UPDATE: &str = "FailedUpdate";
pub const REASON_FAILED_DELETE: &str = "FailedDelete";
pub const REASON_ASG_NOT_FOUND: &str = "ASGNotFound";
pub const REASON_DELETION_IN_PROGRESS: &str = "DeletionInProgress";
pub const REASON_SUCCESSFUL_DELETE_LAUNCH_TEMPLATE: &str =
    "SuccessfulDeleteLaunchTemplate";

pub const REASON_FAILED_NO_SUBNETS: &str = "FailedNoSubnets";
pub const REASON_FAILED_DEFAULT_SUBNETS: &str = "FailedDefaultSubnets";
pub const REASON_FAILED_TAG_SUBNET: &str = "FailedTagSubnet";
pub const REASON_FAILED_MATCH_SUBNET: &str = "FailedMatchSubnet";
pub const REASON_FAILED_NO_PRIVATE_SUBNET: &str = "FailedNoPrivateSubnet";
pub const REASON_FAILED_NO_PUBLIC_SUBNET: &str = "FailedNoPublicSubnet";
pub const REASON_FAILED_NO_SUBNET: &str = "FailedNoSubnet";
pub const REASON_FAILED_DESCRIBE_SUBNET: &str = "FailedDescribeSubnet";
pub const REASON_FAILED_CREATE_SUBNET: &str = "FailedCreateSubnet";
pub const REASON_SUCCESSFUL_CREATE_SUBNET: &str = "SuccessfulCreateSubnet";
pub const REASON_FAILED_MODIFY_SUBNET: &str = "FailedModifySubnetAttributes";
pub const REASON_SUCCESSFUL_MODIFY_SUBNET: &str =
    "SuccessfulModifySubnetAttributes";
pub const REASON_FAILED_DELETE_SUBNET: &str = "FailedDeleteSubnet";
pub const REASON_SUCCESSFUL_DELETE_SUBNET: &str = "SuccessfulDeleteSubnet";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Destination of human-readable events about one object.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: String,
    );
}

/// Publishes through the kube event recorder against a fixed object.
pub struct KubeEventSink {
    recorder: Recorder,
    obj_ref: ObjectReference,
}

impl KubeEventSink {
    pub fn new(recorder: Recorder, obj_ref: ObjectReference) -> Self {
        Self { recorder, obj_ref }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: String,
    ) {
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        if let Err(e) = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: action.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
        {
            debug!(error = %e, %reason, "event publish failed");
        }
    }
}

#[cfg(test)]
pub use recording::{RecordedEvent, RecordingSink};
