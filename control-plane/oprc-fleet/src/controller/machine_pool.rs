use std::sync::Arc;

use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::conditions::{self, summarize};
use super::events::{
    EventKind, EventSink, REASON_ASG_NOT_FOUND, REASON_DELETION_IN_PROGRESS,
    REASON_FAILED_CREATE, REASON_FAILED_DELETE, REASON_FAILED_LAUNCH_TEMPLATE,
    REASON_FAILED_UPDATE, REASON_SUCCESSFUL_DELETE_LAUNCH_TEMPLATE,
};
use super::scope::{ClusterInfo, MACHINE_POOL_FINALIZER, PoolScope};
use super::{ControllerContext, Outcome, ReconcileErr, persist};
use crate::asg::{self, process_delta, processes};
use crate::cloud::{
    AutoScalingGroup, CloudClients, CloudResult, LaunchTemplateRef,
    LaunchTemplateRequest, Tags,
};
use crate::crd::cluster::FleetCluster;
use crate::crd::common::{ConditionSeverity, ConditionType};
use crate::crd::machine_pool::MachinePool;
use crate::tags::{BuildParams, ResourceLifecycle, TagReconciler, build_tags};

const ACTION: &str = "ReconcileMachinePool";
const NODE_ROLE: &str = "node";

/// Conditions the pool's Ready condition is derived from.
pub const READY_FROM: [ConditionType; 2] =
    [ConditionType::LaunchTemplateReady, ConditionType::AsgReady];

/// Provider id of one instance, `aws:///<zone>/<instance-id>`.
pub fn instance_provider_id(zone: &str, instance_id: &str) -> String {
    format!("aws:///{zone}/{instance_id}")
}

/// Drives one pool's scaling group and launch template towards its spec.
pub struct PoolReconciler<'a> {
    clouds: &'a CloudClients,
    events: &'a dyn EventSink,
}

impl<'a> PoolReconciler<'a> {
    pub fn new(clouds: &'a CloudClients, events: &'a dyn EventSink) -> Self {
        Self { clouds, events }
    }

    async fn warn(&self, reason: &str, note: String) {
        self.events
            .publish(EventKind::Warning, reason, ACTION, note)
            .await;
    }

    async fn normal(&self, reason: &str, note: String) {
        self.events
            .publish(EventKind::Normal, reason, ACTION, note)
            .await;
    }

    /// Create or converge the pool's scaling group. `cluster` is None when
    /// the referenced cluster does not exist (yet).
    pub async fn reconcile_normal(
        &self,
        scope: &mut PoolScope,
        cluster: Option<&ClusterInfo>,
    ) -> Result<Outcome, ReconcileErr> {
        if scope.has_failure() {
            info!(
                reason = ?scope.status.failure_reason,
                message = ?scope.status.failure_message,
                "Error state detected, skipping reconciliation"
            );
            return Ok(Outcome::Failed);
        }

        scope.finalizers.add(MACHINE_POOL_FINALIZER);

        let cluster = match cluster {
            Some(c) if c.ready => c,
            _ => {
                info!("Cluster infrastructure is not ready yet");
                conditions::mark_false(
                    scope.conditions_mut(),
                    ConditionType::AsgReady,
                    conditions::REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE,
                    ConditionSeverity::Info,
                    "",
                );
                return Ok(Outcome::Progressing);
            }
        };

        let Some(secret) = scope.spec.bootstrap.data_secret_name.clone() else {
            info!("Bootstrap data secret reference is not yet available");
            conditions::mark_false(
                scope.conditions_mut(),
                ConditionType::AsgReady,
                conditions::REASON_WAITING_FOR_BOOTSTRAP_DATA,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Outcome::Progressing);
        };

        let tags = pool_tags(scope, cluster);
        let launch_template = match self
            .resolve_launch_template(scope, &secret, &tags)
            .await
        {
            Ok(lt) => {
                scope.status.launch_template_id = Some(lt.id.clone());
                scope.status.launch_template_version = Some(lt.version.clone());
                conditions::mark_true(
                    scope.conditions_mut(),
                    ConditionType::LaunchTemplateReady,
                );
                lt
            }
            Err(e) => {
                self.warn(
                    REASON_FAILED_LAUNCH_TEMPLATE,
                    format!("Failed to reconcile launch template: {e}"),
                )
                .await;
                conditions::mark_false(
                    scope.conditions_mut(),
                    ConditionType::LaunchTemplateReady,
                    conditions::REASON_LAUNCH_TEMPLATE_RECONCILE_FAILED,
                    ConditionSeverity::Error,
                    e.to_string(),
                );
                return Err(ReconcileErr::cloud(
                    "failed to reconcile launch template",
                )(e));
            }
        };

        let asg_api = self.clouds.asg.as_ref();
        let name = scope.asg_name().to_string();
        let observed = asg_api
            .get_asg_by_name(&name)
            .await
            .map_err(ReconcileErr::cloud("failed to describe ASG"))?;
        let subnets = asg_api
            .subnet_ids(&scope.spec, &cluster.network)
            .await
            .map_err(ReconcileErr::cloud("failed to resolve ASG subnets"))?;

        let Some(asg) = observed else {
            // a new group has nothing suspended yet; processes are handled
            // on the next pass
            let asg = self
                .create_asg(scope, subnets, launch_template, tags)
                .await?;
            mirror_status(scope, &asg);
            return Ok(Outcome::Progressing);
        };

        self.update_asg(scope, &asg, subnets, launch_template, &tags)
            .await?;

        TagReconciler::new(asg_api)
            .ensure(&asg_tag_params(scope, cluster), &asg.tags)
            .await
            .map_err(ReconcileErr::cloud("failed to reconcile ASG tags"))?;

        self.reconcile_processes(scope, &asg).await?;

        mirror_status(scope, &asg);
        scope.status.ready = true;
        conditions::mark_true(scope.conditions_mut(), ConditionType::AsgReady);
        Ok(Outcome::Ready)
    }

    async fn resolve_launch_template(
        &self,
        scope: &PoolScope,
        secret: &str,
        tags: &Tags,
    ) -> CloudResult<LaunchTemplateRef> {
        let api = self.clouds.launch_templates.as_ref();
        let spec = &scope.spec.launch_template;
        let ami_id = match &spec.ami_id {
            Some(ami) => ami.clone(),
            None => api.discover_launch_template_ami(&spec.instance_type).await?,
        };
        let request = LaunchTemplateRequest {
            name: scope.launch_template_name().to_string(),
            ami_id,
            instance_type: spec.instance_type.clone(),
            iam_instance_profile: spec.iam_instance_profile.clone(),
            ssh_key_name: spec.ssh_key_name.clone(),
            user_data_secret: secret.to_string(),
            tags: tags.clone(),
        };
        api.reconcile_launch_template(&request).await
    }

    async fn create_asg(
        &self,
        scope: &mut PoolScope,
        subnets: Vec<String>,
        launch_template: LaunchTemplateRef,
        tags: Tags,
    ) -> Result<AutoScalingGroup, ReconcileErr> {
        let spec = asg::asg_spec(
            scope.asg_name(),
            &scope.spec,
            scope.externally_managed(),
            subnets,
            Some(launch_template),
            tags,
        );
        info!(asg = %spec.name, "Creating ASG");
        match self.clouds.asg.create_asg(&spec).await {
            Ok(asg) => Ok(asg),
            Err(e) => {
                self.warn(
                    REASON_FAILED_CREATE,
                    format!("Failed to create ASG {:?}: {e}", spec.name),
                )
                .await;
                conditions::mark_false(
                    scope.conditions_mut(),
                    ConditionType::AsgReady,
                    conditions::REASON_ASG_PROVISION_FAILED,
                    ConditionSeverity::Error,
                    e.to_string(),
                );
                Err(ReconcileErr::cloud("failed to create ASG")(e))
            }
        }
    }

    async fn update_asg(
        &self,
        scope: &mut PoolScope,
        asg: &AutoScalingGroup,
        subnets: Vec<String>,
        launch_template: LaunchTemplateRef,
        tags: &Tags,
    ) -> Result<(), ReconcileErr> {
        let externally_managed = scope.externally_managed();
        if externally_managed && asg::sync_external_replicas(&mut scope.spec, asg)
        {
            info!(
                replicas = ?scope.spec.replicas,
                "Setting MachinePool replicas to ASG desired capacity"
            );
        }

        let drifted = asg::needs_update(&scope.spec, externally_managed, asg);
        let subnets_moved = asg::subnets_changed(&subnets, &asg.subnets);
        if !drifted && !subnets_moved {
            debug!(asg = %asg.name, "ASG is up to date");
            return Ok(());
        }

        let spec = asg::asg_spec(
            &asg.name,
            &scope.spec,
            externally_managed,
            subnets,
            Some(launch_template),
            tags.clone(),
        );
        info!(asg = %asg.name, drifted, subnets_moved, "Updating ASG");
        if let Err(e) = self.clouds.asg.update_asg(&spec).await {
            self.warn(
                REASON_FAILED_UPDATE,
                format!("Failed to update ASG {:?}: {e}", asg.name),
            )
            .await;
            conditions::mark_false(
                scope.conditions_mut(),
                ConditionType::AsgReady,
                conditions::REASON_ASG_PROVISION_FAILED,
                ConditionSeverity::Error,
                e.to_string(),
            );
            return Err(ReconcileErr::cloud("failed to update ASG")(e));
        }
        Ok(())
    }

    /// Suspend what the directive asks for and resume everything else that is
    /// currently suspended, as two separate calls.
    async fn reconcile_processes(
        &self,
        scope: &PoolScope,
        asg: &AutoScalingGroup,
    ) -> Result<(), ReconcileErr> {
        let desired = processes::resolve(scope.spec.suspend_processes.as_ref());
        let delta = process_delta(&desired, &asg.currently_suspended_processes);
        if delta.is_empty() {
            return Ok(());
        }
        let api = self.clouds.asg.as_ref();
        if !delta.to_suspend.is_empty() {
            info!(asg = %asg.name, processes = ?delta.to_suspend, "Suspending processes");
            api.suspend_processes(&asg.name, &delta.to_suspend)
                .await
                .map_err(ReconcileErr::cloud("failed to suspend processes"))?;
        }
        if !delta.to_resume.is_empty() {
            info!(asg = %asg.name, processes = ?delta.to_resume, "Resuming processes");
            api.resume_processes(&asg.name, &delta.to_resume)
                .await
                .map_err(ReconcileErr::cloud("failed to resume processes"))?;
        }
        Ok(())
    }

    /// Tear down the pool's group, then its launch template. The finalizer is
    /// only released once the provider no longer reports the group.
    pub async fn reconcile_delete(
        &self,
        scope: &mut PoolScope,
    ) -> Result<Outcome, ReconcileErr> {
        let name = scope.asg_name().to_string();
        let observed = self
            .clouds
            .asg
            .get_asg_by_name(&name)
            .await
            .map_err(ReconcileErr::cloud("failed to describe ASG"))?;

        match observed {
            None => {
                warn!(asg = %name, "Unable to locate ASG");
                scope.set_not_ready();
                conditions::mark_false(
                    scope.conditions_mut(),
                    ConditionType::AsgReady,
                    conditions::REASON_ASG_NOT_FOUND,
                    ConditionSeverity::Warning,
                    "",
                );
                self.normal(
                    REASON_ASG_NOT_FOUND,
                    "Unable to find matching ASG".to_string(),
                )
                .await;
                self.delete_launch_template(scope).await?;
                scope.finalizers.remove(MACHINE_POOL_FINALIZER);
                Ok(Outcome::Deleted)
            }
            Some(asg) if asg.is_deleting() => {
                scope.set_not_ready();
                conditions::mark_false(
                    scope.conditions_mut(),
                    ConditionType::AsgReady,
                    conditions::REASON_ASG_DELETION_IN_PROGRESS,
                    ConditionSeverity::Warning,
                    "",
                );
                self.warn(
                    REASON_DELETION_IN_PROGRESS,
                    format!("ASG deletion in progress: {:?}", asg.name),
                )
                .await;
                info!(asg = %asg.name, "ASG is already deleting");
                Ok(Outcome::DeletePending)
            }
            Some(asg) => {
                info!(
                    asg = %asg.name,
                    status = ?asg.status.as_ref().map(|s| s.as_str()),
                    "Deleting ASG"
                );
                if let Err(e) = self.clouds.asg.delete_asg(&asg.name).await {
                    self.warn(
                        REASON_FAILED_DELETE,
                        format!("Failed to delete ASG {:?}: {e}", asg.name),
                    )
                    .await;
                    return Err(ReconcileErr::cloud("failed to delete ASG")(e));
                }
                scope.set_not_ready();
                Ok(Outcome::DeletePending)
            }
        }
    }

    async fn delete_launch_template(
        &self,
        scope: &mut PoolScope,
    ) -> Result<(), ReconcileErr> {
        let api = self.clouds.launch_templates.as_ref();
        let Some(lt) = api
            .get_launch_template(scope.launch_template_name())
            .await
            .map_err(ReconcileErr::cloud("failed to describe launch template"))?
        else {
            debug!("Unable to locate launch template");
            return Ok(());
        };
        info!(launch_template = %lt.name, "Deleting launch template");
        if let Err(e) = api.delete_launch_template(&lt.id).await {
            self.warn(
                REASON_FAILED_DELETE,
                format!("Failed to delete launch template {:?}: {e}", lt.name),
            )
            .await;
            return Err(ReconcileErr::cloud("failed to delete launch template")(
                e,
            ));
        }
        self.normal(
            REASON_SUCCESSFUL_DELETE_LAUNCH_TEMPLATE,
            format!("Deleted launch template {:?}", lt.name),
        )
        .await;
        scope.status.launch_template_id = None;
        scope.status.launch_template_version = None;
        Ok(())
    }
}

/// Tags shared by the pool's group and launch template: cluster-wide tags
/// first, the pool's own tags win on conflicts.
fn pool_tags(scope: &PoolScope, cluster: &ClusterInfo) -> Tags {
    build_tags(&asg_tag_params(scope, cluster))
}

fn asg_tag_params(scope: &PoolScope, cluster: &ClusterInfo) -> BuildParams {
    let mut additional = cluster.additional_tags.clone();
    additional.extend(scope.spec.additional_tags.clone());
    BuildParams {
        cluster_name: Some(scope.spec.cluster_name.clone()),
        resource_id: scope.asg_name().to_string(),
        lifecycle: Some(ResourceLifecycle::Owned),
        name: Some(scope.name.clone()),
        role: Some(NODE_ROLE.to_string()),
        additional,
    }
}

fn mirror_status(scope: &mut PoolScope, asg: &AutoScalingGroup) {
    if !asg.id.is_empty() {
        scope.spec.provider_id = Some(asg.id.clone());
    }
    scope.spec.provider_id_list = asg
        .instances
        .iter()
        .map(|i| instance_provider_id(&i.availability_zone, &i.id))
        .collect();
    scope.status.replicas =
        i32::try_from(asg.instances.len()).unwrap_or(i32::MAX);
    scope.status.asg_status =
        asg.status.as_ref().map(|s| s.as_str().to_string());
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<MachinePool>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let mut scope = PoolScope::from_object(&obj);
    let api: Api<MachinePool> =
        Api::namespaced(ctx.client.clone(), &scope.namespace);
    let events = ctx.event_sink(obj.as_ref());
    let reconciler = PoolReconciler::new(&ctx.clouds, &events);

    let result = if obj.meta().deletion_timestamp.is_some() {
        reconciler.reconcile_delete(&mut scope).await
    } else {
        let clusters: Api<FleetCluster> =
            Api::namespaced(ctx.client.clone(), &scope.namespace);
        let cluster = clusters
            .get_opt(&scope.spec.cluster_name)
            .await?
            .as_ref()
            .map(ClusterInfo::from);
        reconciler.reconcile_normal(&mut scope, cluster.as_ref()).await
    };

    if !matches!(result, Ok(Outcome::Failed)) {
        summarize(scope.conditions_mut(), &READY_FROM);
        scope.status.observed_generation = scope.generation;
    }
    // written on failure too so conditions and synced fields survive
    persist(&api, &scope.name, scope.pending_writes()).await?;

    let outcome = result?;
    debug!(?outcome, "machine pool pass finished");
    Ok(ctx.action_for(outcome))
}
