pub mod cluster;
pub mod conditions;
pub mod events;
pub mod machine_pool;
pub mod scope;
pub mod status;


use std::fmt::Debug;
use std::sync::Arc;

use futures_util::StreamExt;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, Patch, PatchParams},
    runtime::{
        Controller,
        controller::{Action, Config as ControllerConfig},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config,
    },
};
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, error, info, warn};

use crate::cloud::retry::Backoff;
use crate::cloud::{CloudClients, CloudError};
use crate::config::FleetConfig;
use crate::crd::cluster::FleetCluster;
use crate::crd::machine_pool::MachinePool;
use crate::network::NetworkError;
use events::KubeEventSink;
use scope::PendingWrites;

const CONTROLLER_NAME: &str = "oprc-fleet";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("{context}: {source}")]
    Cloud {
        context: String,
        #[source]
        source: CloudError,
    },
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    pub(crate) fn cloud(
        context: impl Into<String>,
    ) -> impl FnOnce(CloudError) -> ReconcileErr {
        let context = context.into();
        move |source| ReconcileErr::Cloud { context, source }
    }

    /// Errors only a spec edit can fix; polled slowly instead of retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            ReconcileErr::Config(_) => true,
            ReconcileErr::Network(e) => e.is_configuration(),
            _ => false,
        }
    }
}

/// How a pass ended, mapped onto a requeue policy by the runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; periodic resync only.
    Ready,
    /// Work was issued or a dependency is not ready yet.
    Progressing,
    /// A recorded failure blocks the object until it is edited.
    Failed,
    /// The provider is still tearing resources down.
    DeletePending,
    /// Cleanup done and the finalizer released.
    Deleted,
}

#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub cfg: FleetConfig,
    pub clouds: CloudClients,
    pub recorder: Recorder,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: FleetConfig, clouds: CloudClients) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            cfg,
            clouds,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from(&self.cfg.retry)
    }

    pub fn event_sink<K>(&self, obj: &K) -> KubeEventSink
    where
        K: Resource<DynamicType = ()>,
    {
        KubeEventSink::new(self.recorder.clone(), obj.object_ref(&()))
    }

    pub fn action_for(&self, outcome: Outcome) -> Action {
        let requeue = &self.cfg.requeue;
        match outcome {
            Outcome::Ready => Action::requeue(requeue.ok()),
            Outcome::Progressing => Action::requeue(requeue.error()),
            Outcome::DeletePending => Action::requeue(requeue.delete_poll()),
            Outcome::Failed | Outcome::Deleted => Action::await_change(),
        }
    }
}

fn watch_api<K>(client: &Client, cfg: &FleetConfig) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>,
{
    if cfg.k8s_namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), &cfg.k8s_namespace)
    }
}

/// Run the machine pool controller, plus the cluster network controller when
/// enabled, until the watch streams end.
pub async fn run_controllers(
    client: Client,
    cfg: FleetConfig,
    clouds: CloudClients,
) -> anyhow::Result<()> {
    let cfg = cfg.apply_profile_defaults();
    let with_clusters = cfg.features.cluster_controller.unwrap_or(true);
    let concurrency = cfg.concurrency;
    let ctx = Arc::new(ControllerContext::new(client.clone(), cfg, clouds));

    let pools: Api<MachinePool> = watch_api(&client, &ctx.cfg);
    let clusters: Api<FleetCluster> = watch_api(&client, &ctx.cfg);

    let pool_controller = Controller::new(pools, Config::default())
        .with_config(ControllerConfig::default().concurrency(concurrency));
    let store = pool_controller.store();
    // a cluster turning ready wakes up the pools waiting on it
    let pool_controller = pool_controller
        .watches(clusters.clone(), Config::default(), move |cluster| {
            let ns = cluster.namespace();
            let name = cluster.name_any();
            store
                .state()
                .into_iter()
                .filter(|p| p.namespace() == ns && p.spec.cluster_name == name)
                .map(|p| ObjectRef::from_obj(p.as_ref()))
                .collect::<Vec<_>>()
        })
        .run(machine_pool::reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(pool = %obj_ref.name, "reconciled: requeue={:?}", action)
                }
                Err(e) => warn!(error = %e, "machine pool reconcile error"),
            }
        });

    if !with_clusters {
        info!("cluster controller disabled");
        pool_controller.await;
        return Ok(());
    }

    let cluster_controller = Controller::new(clusters, Config::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(cluster::reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(cluster = %obj_ref.name, "reconciled: requeue={:?}", action)
                }
                Err(e) => warn!(error = %e, "cluster reconcile error"),
            }
        });

    futures_util::future::join(pool_controller, cluster_controller).await;
    Ok(())
}

fn error_policy<K>(
    obj: Arc<K>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action
where
    K: Resource,
{
    let requeue = &ctx.cfg.requeue;
    if err.is_configuration() {
        error!(name = %obj.name_any(), error = %err, "configuration error, waiting for a spec change");
        Action::requeue(requeue.config_error())
    } else {
        warn!(name = %obj.name_any(), error = %err, "reconcile failed, retrying");
        Action::requeue(requeue.error())
    }
}

/// Pin a merge patch to the object version it was computed from. The API
/// server answers 409 when anything else wrote the object in between.
pub(crate) fn pinned(mut patch: JsonValue, version: Option<&str>) -> JsonValue {
    if let (Some(version), Some(fields)) = (version, patch.as_object_mut()) {
        let meta = fields.entry("metadata").or_insert_with(|| json!({}));
        meta["resourceVersion"] = json!(version);
    }
    patch
}

/// Apply what a pass changed. The status goes first and finalizers last,
/// since releasing the last finalizer may let the object disappear. Each
/// write is pinned to the version left by the previous one.
pub(crate) async fn persist<K>(
    api: &Api<K>,
    name: &str,
    writes: PendingWrites,
) -> Result<(), ReconcileErr>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let pp = PatchParams::default();
    let mut version = writes.resource_version;
    if let Some(status) = writes.status {
        let patch = pinned(status, version.as_deref());
        let obj = api.patch_status(name, &pp, &Patch::Merge(&patch)).await?;
        version = obj.resource_version();
    }
    if let Some(spec) = writes.spec {
        let patch = pinned(spec, version.as_deref());
        let obj = api.patch(name, &pp, &Patch::Merge(&patch)).await?;
        version = obj.resource_version();
    }
    if let Some(finalizers) = writes.finalizers {
        let patch = pinned(
            json!({"metadata": {"finalizers": finalizers}}),
            version.as_deref(),
        );
        api.patch(name, &pp, &Patch::Merge(&patch)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ErrorCode;
    use crate::network::CidrError;

    #[test]
    fn configuration_errors_are_told_apart() {
        assert!(ReconcileErr::Config("x".into()).is_configuration());
        assert!(
            ReconcileErr::Network(NetworkError::Config("no subnets".into()))
                .is_configuration()
        );
        assert!(
            ReconcileErr::Network(NetworkError::Cidr(CidrError::ZeroParts {
                cidr: "10.0.0.0/16".into(),
            }))
                .is_configuration()
        );
        let cloud = ReconcileErr::cloud("failed to create ASG")(
            CloudError::new(ErrorCode::Throttling, "slow down"),
        );
        assert!(!cloud.is_configuration());
        assert!(cloud.to_string().starts_with("failed to create ASG: "));
    }

    #[test]
    fn writes_are_pinned_to_the_read_version() {
        let patch = pinned(
            json!({"metadata": {"finalizers": ["other.io/keep"]}}),
            Some("41"),
        );
        assert_eq!(
            patch,
            json!({"metadata": {
                "finalizers": ["other.io/keep"],
                "resourceVersion": "41",
            }})
        );

        let status = pinned(json!({"status": {"ready": true}}), Some("42"));
        assert_eq!(status["metadata"]["resourceVersion"], "42");
        assert_eq!(status["status"]["ready"], true);

        let unpinned = pinned(json!({"status": {}}), None);
        assert!(unpinned.get("metadata").is_none());
    }
}
