use std::sync::Arc;

use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::conditions;
use super::events::EventSink;
use super::scope::{CLUSTER_FINALIZER, ClusterScope};
use super::{ControllerContext, Outcome, ReconcileErr, persist};
use crate::cloud::NetworkApi;
use crate::cloud::retry::Backoff;
use crate::crd::cluster::FleetCluster;
use crate::crd::common::{ConditionSeverity, ConditionType};
use crate::network::SubnetService;

/// Reconciles the network of one cluster. Pools only start once this marks
/// the cluster ready.
pub struct ClusterReconciler<'a> {
    network: &'a dyn NetworkApi,
    events: &'a dyn EventSink,
    backoff: Backoff,
    tag_unmanaged: bool,
}

impl<'a> ClusterReconciler<'a> {
    pub fn new(
        network: &'a dyn NetworkApi,
        events: &'a dyn EventSink,
        backoff: Backoff,
    ) -> Self {
        Self {
            network,
            events,
            backoff,
            tag_unmanaged: false,
        }
    }

    pub fn tag_unmanaged(mut self, enabled: bool) -> Self {
        self.tag_unmanaged = enabled;
        self
    }

    fn subnets(&self, scope: &ClusterScope) -> SubnetService<'a> {
        SubnetService::new(
            self.network,
            self.events,
            self.backoff.clone(),
            scope.name.clone(),
        )
        .tag_unmanaged(self.tag_unmanaged)
        .additional_tags(scope.spec.additional_tags.clone())
    }

    pub async fn reconcile_normal(
        &self,
        scope: &mut ClusterScope,
    ) -> Result<Outcome, ReconcileErr> {
        scope.finalizers.add(CLUSTER_FINALIZER);

        let service = self.subnets(scope);
        // the subnet list is updated in place even when the pass fails
        if let Err(e) = service.reconcile_subnets(&mut scope.spec.network).await
        {
            let severity = if e.is_configuration() {
                ConditionSeverity::Error
            } else {
                ConditionSeverity::Warning
            };
            scope.status.ready = false;
            conditions::mark_false(
                scope.conditions_mut(),
                ConditionType::SubnetsReady,
                conditions::REASON_SUBNETS_RECONCILIATION_FAILED,
                severity,
                e.to_string(),
            );
            return Err(e.into());
        }

        conditions::mark_true(scope.conditions_mut(), ConditionType::SubnetsReady);
        if !scope.status.ready {
            info!(cluster = %scope.name, "Cluster infrastructure is ready");
        }
        scope.status.ready = true;
        Ok(Outcome::Ready)
    }

    pub async fn reconcile_delete(
        &self,
        scope: &mut ClusterScope,
    ) -> Result<Outcome, ReconcileErr> {
        scope.status.ready = false;
        let vpc = scope.spec.network.vpc.clone();
        self.subnets(scope).delete_subnets(&vpc).await?;
        scope.finalizers.remove(CLUSTER_FINALIZER);
        Ok(Outcome::Deleted)
    }
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<FleetCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let mut scope = ClusterScope::from_object(&obj);
    let api: Api<FleetCluster> =
        Api::namespaced(ctx.client.clone(), &scope.namespace);
    let events = ctx.event_sink(obj.as_ref());
    let reconciler =
        ClusterReconciler::new(ctx.clouds.network.as_ref(), &events, ctx.backoff())
            .tag_unmanaged(ctx.cfg.tag_unmanaged_network());

    let result = if obj.meta().deletion_timestamp.is_some() {
        reconciler.reconcile_delete(&mut scope).await
    } else {
        reconciler.reconcile_normal(&mut scope).await
    };

    conditions::summarize(scope.conditions_mut(), &[ConditionType::SubnetsReady]);
    scope.status.observed_generation = scope.generation;
    persist(&api, &scope.name, scope.pending_writes()).await?;

    let outcome = result?;
    debug!(?outcome, "cluster pass finished");
    Ok(ctx.action_for(outcome))
}
