//! Tag conventions for managed cloud resources and the reconciler that
//! converges a resource's applied tags onto them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::cloud::{CloudResult, TagsApi};

pub type Tags = BTreeMap<String, String>;

pub const NAME_TAG: &str = "Name";
/// Every key under this prefix is owned by the fleet controllers.
pub const MANAGED_PREFIX: &str = "oaas.io/";
pub const ROLE_TAG: &str = "oaas.io/role";
pub const ASSOCIATION_TAG: &str = "oaas.io/association";
pub const SECONDARY_ASSOCIATION: &str = "secondary";
pub const PUBLIC_ROLE: &str = "public";
pub const PRIVATE_ROLE: &str = "private";
pub const ELB_ROLE_TAG: &str = "kubernetes.io/role/elb";
pub const INTERNAL_ELB_ROLE_TAG: &str = "kubernetes.io/role/internal-elb";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceLifecycle {
    Owned,
    Shared,
}

impl fmt::Display for ResourceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLifecycle::Owned => f.write_str("owned"),
            ResourceLifecycle::Shared => f.write_str("shared"),
        }
    }
}

pub fn cluster_owned_key(cluster_name: &str) -> String {
    format!("{MANAGED_PREFIX}cluster/{cluster_name}")
}

/// Key load-balancer integrations look for to discover cluster subnets.
pub fn cloud_provider_key(cluster_name: &str) -> String {
    format!("kubernetes.io/cluster/{cluster_name}")
}

/// Inputs for the tag set of one resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildParams {
    pub cluster_name: Option<String>,
    pub resource_id: String,
    /// Some(Owned) marks the resource as created and owned by the cluster
    pub lifecycle: Option<ResourceLifecycle>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub additional: Tags,
}

impl BuildParams {
    pub fn is_owned(&self) -> bool {
        self.lifecycle == Some(ResourceLifecycle::Owned)
    }
}

pub fn build_tags(params: &BuildParams) -> Tags {
    let mut tags = params.additional.clone();
    if let (Some(cluster), Some(lifecycle)) =
        (params.cluster_name.as_deref(), params.lifecycle)
    {
        tags.insert(cluster_owned_key(cluster), lifecycle.to_string());
    }
    if let Some(name) = &params.name {
        tags.insert(NAME_TAG.to_string(), name.clone());
    }
    if let Some(role) = &params.role {
        tags.insert(ROLE_TAG.to_string(), role.clone());
    }
    tags
}

/// Keys the reconciler may remove from a resource: stale keys in the managed
/// namespace of an owned resource. Anything else is add-only, so tags set by
/// other tools (autoscaler discovery, cost allocation) survive every pass.
fn removable(key: &str, owned: bool) -> bool {
    owned && key.starts_with(MANAGED_PREFIX)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub create: Tags,
    pub delete: BTreeSet<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

pub fn diff_tags(current: &Tags, desired: &Tags, owned: bool) -> TagDiff {
    let create = desired
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let delete = current
        .keys()
        .filter(|k| !desired.contains_key(*k) && removable(k, owned))
        .cloned()
        .collect();
    TagDiff { create, delete }
}

pub struct TagReconciler<'a, A: TagsApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: TagsApi + ?Sized> TagReconciler<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Converge the tags applied on `params.resource_id` (currently `current`)
    /// onto the set built from `params`, issuing only the calls needed.
    pub async fn ensure(
        &self,
        params: &BuildParams,
        current: &Tags,
    ) -> CloudResult<TagDiff> {
        let desired = build_tags(params);
        let diff = diff_tags(current, &desired, params.is_owned());
        let id = params.resource_id.as_str();
        if !diff.create.is_empty() {
            debug!(resource = %id, keys = ?diff.create.keys().collect::<Vec<_>>(), "creating tags");
            self.api.create_tags(id, &diff.create).await?;
        }
        if !diff.delete.is_empty() {
            debug!(resource = %id, keys = ?diff.delete, "deleting tags");
            self.api.delete_tags(id, &diff.delete).await?;
        }
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::{Call, FakeCloud};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn owned_params() -> BuildParams {
        BuildParams {
            cluster_name: Some("c1".into()),
            resource_id: "subnet-1".into(),
            lifecycle: Some(ResourceLifecycle::Owned),
            name: Some("c1-subnet-private-us-east-1a".into()),
            role: Some(PRIVATE_ROLE.into()),
            additional: tags(&[("team", "infra")]),
        }
    }

    #[test]
    fn build_stamps_ownership_name_and_role() {
        let built = build_tags(&owned_params());
        assert_eq!(
            built,
            tags(&[
                ("Name", "c1-subnet-private-us-east-1a"),
                ("oaas.io/cluster/c1", "owned"),
                ("oaas.io/role", "private"),
                ("team", "infra"),
            ])
        );
    }

    #[test]
    fn build_for_unowned_resource_only_carries_additional() {
        let params = BuildParams {
            resource_id: "subnet-1".into(),
            additional: tags(&[("team", "infra")]),
            ..Default::default()
        };
        assert_eq!(build_tags(&params), tags(&[("team", "infra")]));
    }

    #[test]
    fn unowned_diff_only_adds() {
        let current = tags(&[
            ("owner", "someone-else"),
            ("oaas.io/role", "public"),
            ("aws:cloudformation:stack-name", "s"),
        ]);
        let diff = diff_tags(&current, &Tags::new(), false);
        assert!(diff.is_empty());

        let desired = tags(&[("team", "infra")]);
        let diff = diff_tags(&current, &desired, false);
        assert_eq!(diff.create, desired);
        assert!(diff.delete.is_empty());
    }

    #[test]
    fn owned_diff_removes_only_stale_managed_keys() {
        let current = tags(&[
            ("oaas.io/stale", "1"),
            ("k8s.io/cluster-autoscaler/enabled", "true"),
            ("aws:reserved", "x"),
        ]);
        let desired = tags(&[("new", "2")]);
        let diff = diff_tags(&current, &desired, true);
        assert_eq!(diff.create, desired);
        assert_eq!(diff.delete, BTreeSet::from(["oaas.io/stale".to_string()]));
    }

    #[tokio::test]
    async fn ensure_is_a_noop_when_converged() {
        let cloud = FakeCloud::new();
        let params = owned_params();
        let current = build_tags(&params);
        let diff = TagReconciler::new(&cloud)
            .ensure(&params, &current)
            .await
            .unwrap();
        assert!(diff.is_empty());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn ensure_only_sends_changed_keys() {
        let cloud = FakeCloud::new();
        let params = owned_params();
        let mut current = build_tags(&params);
        current.insert("team".into(), "old".into());
        current.insert("oaas.io/leftover".into(), "1".into());
        current.insert("cost-center".into(), "42".into());
        TagReconciler::new(&cloud)
            .ensure(&params, &current)
            .await
            .unwrap();
        assert_eq!(
            cloud.calls(),
            vec![
                Call::CreateTags("subnet-1".into(), tags(&[("team", "infra")])),
                Call::DeleteTags(
                    "subnet-1".into(),
                    BTreeSet::from(["oaas.io/leftover".to_string()])
                ),
            ]
        );
    }
}
