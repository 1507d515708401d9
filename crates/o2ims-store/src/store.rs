use async_trait::async_trait;
use tokio::sync::broadcast;

use o2ims_domain::{
    BareMetalHost, ClusterInstance, ClusterTemplate, ConfigMap, ManagedCluster,
    NodeAllocationRequest, Policy, ProvisioningRequest,
};

use crate::error::StoreError;
use crate::event::StoreEvent;

/// The hub's declarative store, as the control plane consumes it.
///
/// Writes use optimistic concurrency: the object's resource version must
/// match the stored one or the write fails with [`StoreError::Conflict`].
/// Every successful upsert returns the stored copy (fresh resource version,
/// bumped generation when the spec changed) and emits a [`StoreEvent`] on the
/// watch feed.
///
/// `delete_*` calls are idempotent: deleting an absent object succeeds.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── ProvisioningRequest (cluster-scoped) ─────────────────────────────────

    async fn get_provisioning_request(
        &self,
        name: &str,
    ) -> Result<Option<ProvisioningRequest>, StoreError>;

    async fn list_provisioning_requests(&self) -> Result<Vec<ProvisioningRequest>, StoreError>;

    async fn upsert_provisioning_request(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningRequest, StoreError>;

    /// Stamp the deletion timestamp; the object is removed once its
    /// finalizers are gone.
    async fn mark_provisioning_request_deleted(&self, name: &str) -> Result<(), StoreError>;

    // ── ClusterTemplate ──────────────────────────────────────────────────────

    async fn get_cluster_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterTemplate>, StoreError>;

    async fn list_cluster_templates(&self) -> Result<Vec<ClusterTemplate>, StoreError>;

    async fn upsert_cluster_template(
        &self,
        template: &ClusterTemplate,
    ) -> Result<ClusterTemplate, StoreError>;

    // ── ConfigMap ────────────────────────────────────────────────────────────

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError>;

    async fn upsert_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError>;

    // ── NodeAllocationRequest ────────────────────────────────────────────────

    async fn get_node_allocation_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NodeAllocationRequest>, StoreError>;

    async fn upsert_node_allocation_request(
        &self,
        request: &NodeAllocationRequest,
    ) -> Result<NodeAllocationRequest, StoreError>;

    async fn delete_node_allocation_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    // ── ClusterInstance ──────────────────────────────────────────────────────

    async fn get_cluster_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterInstance>, StoreError>;

    async fn upsert_cluster_instance(
        &self,
        instance: &ClusterInstance,
    ) -> Result<ClusterInstance, StoreError>;

    async fn delete_cluster_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    // ── ManagedCluster (cluster-scoped) ──────────────────────────────────────

    async fn get_managed_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ManagedCluster>, StoreError>;

    async fn upsert_managed_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ManagedCluster, StoreError>;

    // ── Policy ───────────────────────────────────────────────────────────────

    async fn list_policies(&self, namespace: &str) -> Result<Vec<Policy>, StoreError>;

    async fn upsert_policy(&self, policy: &Policy) -> Result<Policy, StoreError>;

    // ── BareMetalHost ────────────────────────────────────────────────────────

    async fn get_bare_metal_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BareMetalHost>, StoreError>;

    async fn upsert_bare_metal_host(
        &self,
        host: &BareMetalHost,
    ) -> Result<BareMetalHost, StoreError>;

    // ── Watch ────────────────────────────────────────────────────────────────

    /// Subscribe to the change feed. Lagging receivers may miss events; the
    /// reconcile loop tolerates this because handlers are idempotent and
    /// requeue on intervals.
    fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}
