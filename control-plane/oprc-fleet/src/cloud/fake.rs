//! In-memory provider double used by the reconciler tests. Records every call
//! and can be primed with errors per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    CreateTags,
    DeleteTags,
    DescribeSubnets,
    CreateSubnet,
    DeleteSubnet,
    ModifySubnetAttribute,
    WaitSubnet,
    DescribeRouteTables,
    DescribeNatGateways,
    DescribeZones,
    GetAsg,
    CreateAsg,
    UpdateAsg,
    DeleteAsg,
    SuspendProcesses,
    ResumeProcesses,
    ReconcileLaunchTemplate,
    GetLaunchTemplate,
    DiscoverAmi,
    DeleteLaunchTemplate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateTags(String, Tags),
    DeleteTags(String, BTreeSet<String>),
    DescribeSubnets,
    CreateSubnet(CreateSubnetInput),
    DeleteSubnet(String),
    ModifySubnetAttribute(String, SubnetAttribute),
    WaitSubnet(String),
    DescribeRouteTables,
    DescribeNatGateways,
    DescribeZones,
    GetAsg(String),
    CreateAsg(AsgSpec),
    UpdateAsg(AsgSpec),
    DeleteAsg(String),
    SuspendProcesses(String, Vec<String>),
    ResumeProcesses(String, Vec<String>),
    ReconcileLaunchTemplate(String),
    GetLaunchTemplate(String),
    DiscoverAmi(String),
    DeleteLaunchTemplate(String),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::CreateTags(..) => Op::CreateTags,
            Call::DeleteTags(..) => Op::DeleteTags,
            Call::DescribeSubnets => Op::DescribeSubnets,
            Call::CreateSubnet(..) => Op::CreateSubnet,
            Call::DeleteSubnet(..) => Op::DeleteSubnet,
            Call::ModifySubnetAttribute(..) => Op::ModifySubnetAttribute,
            Call::WaitSubnet(..) => Op::WaitSubnet,
            Call::DescribeRouteTables => Op::DescribeRouteTables,
            Call::DescribeNatGateways => Op::DescribeNatGateways,
            Call::DescribeZones => Op::DescribeZones,
            Call::GetAsg(..) => Op::GetAsg,
            Call::CreateAsg(..) => Op::CreateAsg,
            Call::UpdateAsg(..) => Op::UpdateAsg,
            Call::DeleteAsg(..) => Op::DeleteAsg,
            Call::SuspendProcesses(..) => Op::SuspendProcesses,
            Call::ResumeProcesses(..) => Op::ResumeProcesses,
            Call::ReconcileLaunchTemplate(..) => Op::ReconcileLaunchTemplate,
            Call::GetLaunchTemplate(..) => Op::GetLaunchTemplate,
            Call::DiscoverAmi(..) => Op::DiscoverAmi,
            Call::DeleteLaunchTemplate(..) => Op::DeleteLaunchTemplate,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: HashMap<Op, VecDeque<CloudError>>,
    subnets: Vec<CloudSubnet>,
    route_tables: Vec<RouteTable>,
    nat_gateways: Vec<NatGateway>,
    zones: Vec<AvailabilityZone>,
    asgs: BTreeMap<String, AutoScalingGroup>,
    launch_templates: BTreeMap<String, LaunchTemplate>,
    next_id: u32,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(self, zones: &[&str]) -> Self {
        self.lock().zones = zones
            .iter()
            .map(|z| AvailabilityZone {
                name: z.to_string(),
                zone_type: ZONE_TYPE_AVAILABILITY_ZONE.into(),
            })
            .collect();
        self
    }

    pub fn with_subnet(self, subnet: CloudSubnet) -> Self {
        self.lock().subnets.push(subnet);
        self
    }

    pub fn with_route_table(self, rt: RouteTable) -> Self {
        self.lock().route_tables.push(rt);
        self
    }

    pub fn with_nat_gateway(self, ngw: NatGateway) -> Self {
        self.lock().nat_gateways.push(ngw);
        self
    }

    pub fn with_asg(self, asg: AutoScalingGroup) -> Self {
        self.lock().asgs.insert(asg.name.clone(), asg);
        self
    }

    pub fn with_launch_template(self, lt: LaunchTemplate) -> Self {
        self.lock().launch_templates.insert(lt.name.clone(), lt);
        self
    }

    /// Queue an error returned by the next call of `op`.
    pub fn fail(&self, op: Op, err: CloudError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn fail_times(&self, op: Op, times: usize, err: CloudError) {
        for _ in 0..times {
            self.fail(op, err.clone());
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Calls that change provider state; reads are left out.
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| {
                !matches!(
                    c.op(),
                    Op::DescribeSubnets
                        | Op::DescribeRouteTables
                        | Op::DescribeNatGateways
                        | Op::DescribeZones
                        | Op::GetAsg
                        | Op::GetLaunchTemplate
                        | Op::WaitSubnet
                        | Op::DiscoverAmi
                )
            })
            .cloned()
            .collect()
    }

    pub fn subnets(&self) -> Vec<CloudSubnet> {
        self.lock().subnets.clone()
    }

    pub fn asg(&self, name: &str) -> Option<AutoScalingGroup> {
        self.lock().asgs.get(name).cloned()
    }

    /// The provider finished tearing the group down.
    pub fn remove_asg(&self, name: &str) {
        self.lock().asgs.remove(name);
    }

    pub fn set_asg_status(&self, name: &str, status: Option<AsgStatus>) {
        if let Some(asg) = self.lock().asgs.get_mut(name) {
            asg.status = status;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) -> CloudResult<()> {
        let mut st = self.lock();
        let op = call.op();
        st.calls.push(call);
        match st.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut st = self.lock();
        st.next_id += 1;
        format!("{prefix}-{:04}", st.next_id)
    }
}

#[async_trait]
impl TagsApi for FakeCloud {
    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &Tags,
    ) -> CloudResult<()> {
        self.record(Call::CreateTags(resource_id.into(), tags.clone()))?;
        let mut st = self.lock();
        if let Some(sn) = st.subnets.iter_mut().find(|s| s.id == resource_id) {
            sn.tags.extend(tags.clone());
        }
        if let Some(asg) = st.asgs.get_mut(resource_id) {
            asg.tags.extend(tags.clone());
        }
        Ok(())
    }

    async fn delete_tags(
        &self,
        resource_id: &str,
        keys: &BTreeSet<String>,
    ) -> CloudResult<()> {
        self.record(Call::DeleteTags(resource_id.into(), keys.clone()))?;
        let mut st = self.lock();
        if let Some(sn) = st.subnets.iter_mut().find(|s| s.id == resource_id) {
            sn.tags.retain(|k, _| !keys.contains(k));
        }
        if let Some(asg) = st.asgs.get_mut(resource_id) {
            asg.tags.retain(|k, _| !keys.contains(k));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkApi for FakeCloud {
    async fn describe_subnets(
        &self,
        input: &DescribeSubnetsInput,
    ) -> CloudResult<Vec<CloudSubnet>> {
        self.record(Call::DescribeSubnets)?;
        let st = self.lock();
        Ok(st
            .subnets
            .iter()
            .filter(|s| input.states.is_empty() || input.states.contains(&s.state))
            .filter(|s| match (&input.vpc_id, &input.cluster_name) {
                (Some(vpc), _) => &s.vpc_id == vpc,
                (None, Some(cluster)) => s
                    .tags
                    .contains_key(&crate::tags::cluster_owned_key(cluster)),
                (None, None) => true,
            })
            .cloned()
            .collect())
    }

    async fn create_subnet(
        &self,
        input: &CreateSubnetInput,
    ) -> CloudResult<CloudSubnet> {
        self.record(Call::CreateSubnet(input.clone()))?;
        let subnet = CloudSubnet {
            id: self.next_id("subnet"),
            vpc_id: input.vpc_id.clone(),
            cidr_block: Some(input.cidr_block.clone()),
            availability_zone: input.availability_zone.clone(),
            ipv6_associations: input
                .ipv6_cidr_block
                .iter()
                .map(|c| Ipv6Association {
                    cidr_block: c.clone(),
                    state: IPV6_ASSOCIATED.into(),
                })
                .collect(),
            map_public_ip_on_launch: false,
            state: SubnetState::Pending,
            tags: input.tags.clone(),
        };
        self.lock().subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()> {
        self.record(Call::DeleteSubnet(subnet_id.into()))?;
        self.lock().subnets.retain(|s| s.id != subnet_id);
        Ok(())
    }

    async fn modify_subnet_attribute(
        &self,
        subnet_id: &str,
        attribute: SubnetAttribute,
    ) -> CloudResult<()> {
        self.record(Call::ModifySubnetAttribute(subnet_id.into(), attribute))?;
        if let SubnetAttribute::MapPublicIpOnLaunch(v) = attribute {
            if let Some(sn) =
                self.lock().subnets.iter_mut().find(|s| s.id == subnet_id)
            {
                sn.map_public_ip_on_launch = v;
            }
        }
        Ok(())
    }

    async fn wait_until_subnet_available(
        &self,
        subnet_id: &str,
    ) -> CloudResult<()> {
        self.record(Call::WaitSubnet(subnet_id.into()))?;
        if let Some(sn) =
            self.lock().subnets.iter_mut().find(|s| s.id == subnet_id)
        {
            sn.state = SubnetState::Available;
        }
        Ok(())
    }

    async fn describe_route_tables(
        &self,
        vpc_id: &str,
    ) -> CloudResult<Vec<RouteTable>> {
        self.record(Call::DescribeRouteTables)?;
        Ok(self
            .lock()
            .route_tables
            .iter()
            .filter(|rt| rt.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn describe_nat_gateways(
        &self,
        _vpc_id: &str,
    ) -> CloudResult<Vec<NatGateway>> {
        self.record(Call::DescribeNatGateways)?;
        Ok(self.lock().nat_gateways.clone())
    }

    async fn describe_availability_zones(
        &self,
    ) -> CloudResult<Vec<AvailabilityZone>> {
        self.record(Call::DescribeZones)?;
        Ok(self.lock().zones.clone())
    }
}

#[async_trait]
impl AsgApi for FakeCloud {
    async fn get_asg_by_name(
        &self,
        name: &str,
    ) -> CloudResult<Option<AutoScalingGroup>> {
        self.record(Call::GetAsg(name.into()))?;
        Ok(self.lock().asgs.get(name).cloned())
    }

    async fn create_asg(&self, spec: &AsgSpec) -> CloudResult<AutoScalingGroup> {
        self.record(Call::CreateAsg(spec.clone()))?;
        let asg = AutoScalingGroup {
            id: format!("arn:aws:autoscaling:::autoScalingGroup/{}", spec.name),
            name: spec.name.clone(),
            desired_capacity: spec.desired_capacity,
            min_size: spec.min_size,
            max_size: spec.max_size,
            capacity_rebalance: spec.capacity_rebalance,
            mixed_instances_policy: spec.mixed_instances_policy.clone(),
            subnets: spec.subnets.clone(),
            tags: spec.tags.clone(),
            ..Default::default()
        };
        self.lock().asgs.insert(asg.name.clone(), asg.clone());
        Ok(asg)
    }

    async fn update_asg(&self, spec: &AsgSpec) -> CloudResult<()> {
        self.record(Call::UpdateAsg(spec.clone()))?;
        if let Some(asg) = self.lock().asgs.get_mut(&spec.name) {
            if spec.desired_capacity.is_some() {
                asg.desired_capacity = spec.desired_capacity;
            }
            asg.min_size = spec.min_size;
            asg.max_size = spec.max_size;
            asg.capacity_rebalance = spec.capacity_rebalance;
            asg.mixed_instances_policy = spec.mixed_instances_policy.clone();
            asg.subnets = spec.subnets.clone();
        }
        Ok(())
    }

    async fn delete_asg(&self, name: &str) -> CloudResult<()> {
        self.record(Call::DeleteAsg(name.into()))?;
        if let Some(asg) = self.lock().asgs.get_mut(name) {
            asg.status = Some(AsgStatus::DeleteInProgress);
        }
        Ok(())
    }

    async fn suspend_processes(
        &self,
        name: &str,
        processes: &[String],
    ) -> CloudResult<()> {
        self.record(Call::SuspendProcesses(name.into(), processes.to_vec()))?;
        if let Some(asg) = self.lock().asgs.get_mut(name) {
            asg.currently_suspended_processes
                .extend(processes.iter().cloned());
        }
        Ok(())
    }

    async fn resume_processes(
        &self,
        name: &str,
        processes: &[String],
    ) -> CloudResult<()> {
        self.record(Call::ResumeProcesses(name.into(), processes.to_vec()))?;
        if let Some(asg) = self.lock().asgs.get_mut(name) {
            asg.currently_suspended_processes
                .retain(|p| !processes.contains(p));
        }
        Ok(())
    }
}

#[async_trait]
impl LaunchTemplateApi for FakeCloud {
    async fn reconcile_launch_template(
        &self,
        request: &LaunchTemplateRequest,
    ) -> CloudResult<LaunchTemplateRef> {
        self.record(Call::ReconcileLaunchTemplate(request.name.clone()))?;
        let existing = self.lock().launch_templates.get(&request.name).cloned();
        let lt = match existing {
            Some(lt) => lt,
            None => {
                let lt = LaunchTemplate {
                    id: self.next_id("lt"),
                    name: request.name.clone(),
                    latest_version: "1".into(),
                    ami_id: Some(request.ami_id.clone()),
                };
                self.lock()
                    .launch_templates
                    .insert(lt.name.clone(), lt.clone());
                lt
            }
        };
        Ok(LaunchTemplateRef {
            id: lt.id,
            version: lt.latest_version,
        })
    }

    async fn get_launch_template(
        &self,
        name: &str,
    ) -> CloudResult<Option<LaunchTemplate>> {
        self.record(Call::GetLaunchTemplate(name.into()))?;
        Ok(self.lock().launch_templates.get(name).cloned())
    }

    async fn discover_launch_template_ami(
        &self,
        instance_type: &str,
    ) -> CloudResult<String> {
        self.record(Call::DiscoverAmi(instance_type.into()))?;
        Ok("ami-default".into())
    }

    async fn delete_launch_template(&self, id: &str) -> CloudResult<()> {
        self.record(Call::DeleteLaunchTemplate(id.into()))?;
        self.lock().launch_templates.retain(|_, lt| lt.id != id);
        Ok(())
    }
}
