//! Narrow contracts over the cloud provider. Every verb the reconcilers need is
//! a trait method here; the generated SDK bindings live behind them.

pub mod error;
#[cfg(test)]
pub mod fake;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

pub use error::{CloudError, ErrorCode};
pub use types::*;

use crate::crd::cluster::NetworkSpec;
use crate::crd::machine_pool::MachinePoolSpec;

pub type CloudResult<T> = Result<T, CloudError>;

#[async_trait]
pub trait TagsApi: Send + Sync {
    async fn create_tags(&self, resource_id: &str, tags: &Tags)
    -> CloudResult<()>;

    async fn delete_tags(
        &self,
        resource_id: &str,
        keys: &BTreeSet<String>,
    ) -> CloudResult<()>;
}

#[async_trait]
pub trait NetworkApi: TagsApi {
    async fn describe_subnets(
        &self,
        input: &DescribeSubnetsInput,
    ) -> CloudResult<Vec<CloudSubnet>>;

    async fn create_subnet(
        &self,
        input: &CreateSubnetInput,
    ) -> CloudResult<CloudSubnet>;

    async fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()>;

    async fn modify_subnet_attribute(
        &self,
        subnet_id: &str,
        attribute: SubnetAttribute,
    ) -> CloudResult<()>;

    /// Resolves once the subnet reports `available`; bounded by the client's
    /// own waiter.
    async fn wait_until_subnet_available(
        &self,
        subnet_id: &str,
    ) -> CloudResult<()>;

    async fn describe_route_tables(
        &self,
        vpc_id: &str,
    ) -> CloudResult<Vec<RouteTable>>;

    async fn describe_nat_gateways(
        &self,
        vpc_id: &str,
    ) -> CloudResult<Vec<NatGateway>>;

    async fn describe_availability_zones(
        &self,
    ) -> CloudResult<Vec<AvailabilityZone>>;
}

#[async_trait]
pub trait AsgApi: TagsApi {
    async fn get_asg_by_name(
        &self,
        name: &str,
    ) -> CloudResult<Option<AutoScalingGroup>>;

    async fn create_asg(&self, spec: &AsgSpec) -> CloudResult<AutoScalingGroup>;

    async fn update_asg(&self, spec: &AsgSpec) -> CloudResult<()>;

    async fn delete_asg(&self, name: &str) -> CloudResult<()>;

    async fn suspend_processes(
        &self,
        name: &str,
        processes: &[String],
    ) -> CloudResult<()>;

    async fn resume_processes(
        &self,
        name: &str,
        processes: &[String],
    ) -> CloudResult<()>;

    /// Subnets the group should span. Explicit ids on the pool win, otherwise
    /// the cluster's private subnets (optionally narrowed to the pool's zones).
    async fn subnet_ids(
        &self,
        pool: &MachinePoolSpec,
        network: &NetworkSpec,
    ) -> CloudResult<Vec<String>> {
        Ok(crate::asg::default_subnet_ids(pool, network))
    }
}

#[async_trait]
pub trait LaunchTemplateApi: Send + Sync {
    /// Create the template or add a version when the request drifted.
    async fn reconcile_launch_template(
        &self,
        request: &LaunchTemplateRequest,
    ) -> CloudResult<LaunchTemplateRef>;

    async fn get_launch_template(
        &self,
        name: &str,
    ) -> CloudResult<Option<LaunchTemplate>>;

    async fn discover_launch_template_ami(
        &self,
        instance_type: &str,
    ) -> CloudResult<String>;

    async fn delete_launch_template(&self, id: &str) -> CloudResult<()>;
}

/// Shared, read-only handles used by every reconcile pass.
#[derive(Clone)]
pub struct CloudClients {
    pub network: Arc<dyn NetworkApi>,
    pub asg: Arc<dyn AsgApi>,
    pub launch_templates: Arc<dyn LaunchTemplateApi>,
}
