//! Per-pass working copies of the custom resources. A scope starts as a
//! snapshot of the watched object; reconcilers mutate it and the runner
//! persists whatever differs from the snapshot when the pass ends.

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde_json::{Value as JsonValue, json};

use super::status::should_patch_status;
use crate::asg::replicas_externally_managed;
use crate::crd::cluster::{
    FleetCluster, FleetClusterSpec, FleetClusterStatus, NetworkSpec,
};
use crate::crd::common::Condition;
use crate::crd::machine_pool::{
    MachinePool, MachinePoolSpec, MachinePoolStatus,
};
use crate::tags::Tags;

pub const MACHINE_POOL_FINALIZER: &str = "fleet.oaas.io/machinepool";
pub const CLUSTER_FINALIZER: &str = "fleet.oaas.io/cluster";

/// Finalizer tokens of one object. Only single tokens are ever added or
/// removed so tokens owned by other controllers survive untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(Vec<String>);

impl FinalizerSet {
    pub fn new(tokens: Vec<String>) -> Self {
        Self(tokens)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Returns true when the token was not present yet.
    pub fn add(&mut self, token: &str) -> bool {
        if self.contains(token) {
            return false;
        }
        self.0.push(token.to_string());
        true
    }

    /// Returns true when the token was present.
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != token);
        before != self.0.len()
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

/// Writes a finished pass has to make, in the order they must happen.
#[derive(Debug, Default)]
pub struct PendingWrites {
    /// Version of the object the pass read; every write is conditional on it.
    pub resource_version: Option<String>,
    pub status: Option<JsonValue>,
    pub spec: Option<JsonValue>,
    pub finalizers: Option<Vec<String>>,
}

impl PendingWrites {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.spec.is_none()
            && self.finalizers.is_none()
    }
}

/// What the cluster tells a pool about its infrastructure.
#[derive(Clone, Debug, Default)]
pub struct ClusterInfo {
    pub name: String,
    pub ready: bool,
    pub network: NetworkSpec,
    pub additional_tags: Tags,
}

impl From<&FleetCluster> for ClusterInfo {
    fn from(cluster: &FleetCluster) -> Self {
        Self {
            name: cluster.name_any(),
            ready: cluster.status.as_ref().is_some_and(|s| s.ready),
            network: cluster.spec.network.clone(),
            additional_tags: cluster.spec.additional_tags.clone(),
        }
    }
}

pub struct PoolScope {
    pub name: String,
    pub namespace: String,
    pub generation: Option<i64>,
    pub annotations: BTreeMap<String, String>,
    pub spec: MachinePoolSpec,
    pub status: MachinePoolStatus,
    pub finalizers: FinalizerSet,
    resource_version: Option<String>,
    original_spec: JsonValue,
    original_status: Option<MachinePoolStatus>,
    original_finalizers: FinalizerSet,
}

impl PoolScope {
    pub fn from_object(obj: &MachinePool) -> Self {
        let finalizers = FinalizerSet::new(obj.finalizers().to_vec());
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| "default".into()),
            generation: obj.meta().generation,
            annotations: obj.annotations().clone(),
            spec: obj.spec.clone(),
            status: obj.status.clone().unwrap_or_default(),
            finalizers: finalizers.clone(),
            resource_version: obj.resource_version(),
            original_spec: serde_json::to_value(&obj.spec)
                .unwrap_or(JsonValue::Null),
            original_status: obj.status.clone(),
            original_finalizers: finalizers,
        }
    }

    /// Scaling group and launch template share the pool's name.
    pub fn asg_name(&self) -> &str {
        &self.name
    }

    pub fn launch_template_name(&self) -> &str {
        &self.name
    }

    pub fn externally_managed(&self) -> bool {
        replicas_externally_managed(Some(&self.annotations))
    }

    pub fn has_failure(&self) -> bool {
        self.status.failure_reason.is_some()
            || self.status.failure_message.is_some()
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status.conditions.as_deref().unwrap_or_default()
    }

    pub fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        self.status.conditions.get_or_insert_with(Vec::new)
    }

    pub fn set_not_ready(&mut self) {
        self.status.ready = false;
    }

    pub fn spec_changed(&self) -> bool {
        serde_json::to_value(&self.spec).unwrap_or(JsonValue::Null)
            != self.original_spec
    }

    /// Only the fields a pass writes back into the spec are patched: the
    /// synced replica count and the provider ids.
    pub fn pending_writes(&self) -> PendingWrites {
        PendingWrites {
            resource_version: self.resource_version.clone(),
            status: should_patch_status(
                self.original_status.as_ref(),
                &self.status,
            )
            .then(|| json!({ "status": self.status })),
            spec: self.spec_changed().then(|| {
                json!({ "spec": {
                    "replicas": self.spec.replicas,
                    "provider_id": self.spec.provider_id,
                    "provider_id_list": self.spec.provider_id_list,
                }})
            }),
            finalizers: (self.finalizers != self.original_finalizers)
                .then(|| self.finalizers.tokens().to_vec()),
        }
    }
}

pub struct ClusterScope {
    pub name: String,
    pub namespace: String,
    pub generation: Option<i64>,
    pub spec: FleetClusterSpec,
    pub status: FleetClusterStatus,
    pub finalizers: FinalizerSet,
    resource_version: Option<String>,
    original_spec: JsonValue,
    original_status: Option<FleetClusterStatus>,
    original_finalizers: FinalizerSet,
}

impl ClusterScope {
    pub fn from_object(obj: &FleetCluster) -> Self {
        let finalizers = FinalizerSet::new(obj.finalizers().to_vec());
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| "default".into()),
            generation: obj.meta().generation,
            spec: obj.spec.clone(),
            status: obj.status.clone().unwrap_or_default(),
            finalizers: finalizers.clone(),
            resource_version: obj.resource_version(),
            original_spec: serde_json::to_value(&obj.spec)
                .unwrap_or(JsonValue::Null),
            original_status: obj.status.clone(),
            original_finalizers: finalizers,
        }
    }

    pub fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        self.status.conditions.get_or_insert_with(Vec::new)
    }

    pub fn spec_changed(&self) -> bool {
        serde_json::to_value(&self.spec).unwrap_or(JsonValue::Null)
            != self.original_spec
    }

    /// The subnet list is the only part of the spec a pass fills in.
    pub fn pending_writes(&self) -> PendingWrites {
        PendingWrites {
            resource_version: self.resource_version.clone(),
            status: should_patch_status(
                self.original_status.as_ref(),
                &self.status,
            )
            .then(|| json!({ "status": self.status })),
            spec: self.spec_changed().then(|| {
                json!({ "spec": { "network": {
                    "subnets": self.spec.network.subnets,
                }}})
            }),
            finalizers: (self.finalizers != self.original_finalizers)
                .then(|| self.finalizers.tokens().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(finalizers: &[&str]) -> MachinePool {
        let mut obj: MachinePool = serde_json::from_value(json!({
            "apiVersion": "fleet.oaas.io/v1alpha1",
            "kind": "MachinePool",
            "metadata": {
                "name": "pool-a",
                "namespace": "ns1",
                "generation": 3,
                "resourceVersion": "41",
            },
            "spec": { "cluster_name": "c1" }
        }))
        .unwrap();
        obj.metadata.finalizers =
            Some(finalizers.iter().map(|f| f.to_string()).collect());
        obj
    }

    #[test]
    fn finalizer_set_touches_single_tokens() {
        let mut set = FinalizerSet::new(vec!["other.io/keep".into()]);
        assert!(set.add(MACHINE_POOL_FINALIZER));
        assert!(!set.add(MACHINE_POOL_FINALIZER));
        assert_eq!(set.tokens().len(), 2);
        assert!(set.remove(MACHINE_POOL_FINALIZER));
        assert!(!set.remove(MACHINE_POOL_FINALIZER));
        assert_eq!(set.tokens(), ["other.io/keep".to_string()]);
    }

    #[test]
    fn untouched_scope_writes_only_initial_status() {
        let scope = PoolScope::from_object(&pool(&[MACHINE_POOL_FINALIZER]));
        assert_eq!(scope.name, "pool-a");
        assert_eq!(scope.namespace, "ns1");
        let writes = scope.pending_writes();
        // no status recorded yet, so the first pass always writes one
        assert!(writes.status.is_some());
        assert!(writes.spec.is_none());
        assert!(writes.finalizers.is_none());
    }

    #[test]
    fn changes_show_up_as_pending_writes() {
        let mut obj = pool(&[]);
        obj.status = Some(MachinePoolStatus {
            observed_generation: Some(3),
            ..Default::default()
        });
        let mut scope = PoolScope::from_object(&obj);
        assert!(scope.pending_writes().is_empty());

        scope.finalizers.add(MACHINE_POOL_FINALIZER);
        scope.spec.replicas = Some(4);
        scope.status.ready = true;
        let writes = scope.pending_writes();
        assert_eq!(
            writes.finalizers,
            Some(vec![MACHINE_POOL_FINALIZER.to_string()])
        );
        assert_eq!(writes.resource_version.as_deref(), Some("41"));
        assert_eq!(writes.spec.unwrap()["spec"]["replicas"], 4);
        assert_eq!(writes.status.unwrap()["status"]["ready"], true);
    }
}
