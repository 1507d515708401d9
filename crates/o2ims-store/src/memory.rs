use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use o2ims_domain::{
    BareMetalHost, ClusterInstance, ClusterTemplate, ConfigMap, ManagedCluster,
    NodeAllocationRequest, ObjectMeta, Policy, ProvisioningRequest,
};

use crate::error::StoreError;
use crate::event::{ObjectKind, StoreEvent};
use crate::store::StateStore;

/// Access an object's metadata and its generation-relevant/status content.
/// Lets [`Table`] implement the write semantics once for every kind.
trait Stored: Clone + Send {
    const KIND: ObjectKind;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec_value(&self) -> Value;
    fn status_value(&self) -> Value;
}

macro_rules! stored {
    ($ty:ty, $kind:expr, $spec:expr, $status:expr) => {
        impl Stored for $ty {
            const KIND: ObjectKind = $kind;
            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
            fn spec_value(&self) -> Value {
                let f: fn(&$ty) -> Value = $spec;
                f(self)
            }
            fn status_value(&self) -> Value {
                let f: fn(&$ty) -> Value = $status;
                f(self)
            }
        }
    };
}

fn json<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

stored!(
    ProvisioningRequest,
    ObjectKind::ProvisioningRequest,
    |o| json(&o.spec),
    |o| json(&o.status)
);
stored!(
    ClusterTemplate,
    ObjectKind::ClusterTemplate,
    |o| json(&o.spec),
    |o| json(&o.status)
);
stored!(
    ConfigMap,
    ObjectKind::ConfigMap,
    |o| json(&(&o.data, o.immutable)),
    |_| Value::Null
);
stored!(
    NodeAllocationRequest,
    ObjectKind::NodeAllocationRequest,
    |o| json(&o.spec),
    |o| json(&o.status)
);
stored!(
    ClusterInstance,
    ObjectKind::ClusterInstance,
    |o| json(&o.spec),
    |o| json(&o.status)
);
stored!(
    ManagedCluster,
    ObjectKind::ManagedCluster,
    |_| Value::Null,
    |o| json(&o.status)
);
stored!(Policy, ObjectKind::Policy, |o| json(&o.spec), |o| json(
    &o.status
));
stored!(
    BareMetalHost,
    ObjectKind::BareMetalHost,
    |o| json(&o.spec),
    |_| Value::Null
);

// ── Table ─────────────────────────────────────────────────────────────────────

/// One kind's objects, keyed by (namespace, name). BTreeMap keeps listings
/// deterministic.
#[derive(Debug)]
struct Table<T> {
    items: BTreeMap<(String, String), T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Table {
            items: BTreeMap::new(),
        }
    }
}

impl<T: Stored> Table<T> {
    fn get(&self, namespace: &str, name: &str) -> Option<T> {
        self.items
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn list(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    fn list_namespace(&self, namespace: &str) -> Vec<T> {
        self.items
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Optimistic-concurrency write. Bumps the resource version, bumps the
    /// generation when the spec content changed, and removes the object when
    /// it is marked deleted with no finalizers left.
    fn upsert(&mut self, obj: &T) -> Result<(T, StoreEvent), StoreError> {
        let key = (obj.meta().namespace.clone(), obj.meta().name.clone());
        let mut incoming = obj.clone();

        let event = match self.items.get(&key) {
            Some(existing) => {
                if incoming.meta().resource_version != existing.meta().resource_version {
                    return Err(StoreError::Conflict {
                        kind: T::KIND,
                        name: existing.meta().name.clone(),
                    });
                }
                let spec_changed = incoming.spec_value() != existing.spec_value();
                let status_changed = incoming.status_value() != existing.status_value();
                let prior_generation = existing.meta().generation;
                let prior_created = existing.meta().creation_timestamp;
                let prior_uid = existing.meta().uid;

                let meta = incoming.meta_mut();
                meta.resource_version += 1;
                meta.creation_timestamp = prior_created;
                meta.uid = prior_uid;
                meta.generation = if spec_changed {
                    prior_generation + 1
                } else {
                    prior_generation
                };

                let deleted = meta.is_deleting() && meta.finalizers.is_empty();
                if deleted {
                    self.items.remove(&key);
                } else {
                    self.items.insert(key.clone(), incoming.clone());
                }
                StoreEvent {
                    kind: T::KIND,
                    namespace: key.0,
                    name: key.1,
                    spec_changed,
                    status_changed,
                    deleted,
                }
            }
            None => {
                let meta = incoming.meta_mut();
                meta.resource_version = 1;
                meta.generation = 1;
                if meta.uid.is_none() {
                    meta.uid = Some(Uuid::new_v4());
                }
                if meta.creation_timestamp.is_none() {
                    meta.creation_timestamp = Some(Utc::now());
                }
                self.items.insert(key.clone(), incoming.clone());
                StoreEvent {
                    kind: T::KIND,
                    namespace: key.0,
                    name: key.1,
                    spec_changed: true,
                    status_changed: true,
                    deleted: false,
                }
            }
        };
        Ok((incoming, event))
    }

    fn remove(&mut self, namespace: &str, name: &str) -> Option<StoreEvent> {
        self.items
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| StoreEvent {
                kind: T::KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
                spec_changed: false,
                status_changed: false,
                deleted: true,
            })
    }
}

// ── InMemoryStore ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    provisioning_requests: Table<ProvisioningRequest>,
    cluster_templates: Table<ClusterTemplate>,
    config_maps: Table<ConfigMap>,
    node_allocation_requests: Table<NodeAllocationRequest>,
    cluster_instances: Table<ClusterInstance>,
    managed_clusters: Table<ManagedCluster>,
    policies: Table<Policy>,
    bare_metal_hosts: Table<BareMetalHost>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Stands in for the hub store in tests and
/// seeded development runs.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self { inner: Arc::new(RwLock::new(Inner::default())), events }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine; offline commands reconcile without watching.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get_provisioning_request(
        &self,
        name: &str,
    ) -> Result<Option<ProvisioningRequest>, StoreError> {
        Ok(self.inner.read().await.provisioning_requests.get("", name))
    }

    async fn list_provisioning_requests(&self) -> Result<Vec<ProvisioningRequest>, StoreError> {
        Ok(self.inner.read().await.provisioning_requests.list())
    }

    async fn upsert_provisioning_request(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningRequest, StoreError> {
        let (stored, event) = self
            .inner
            .write()
            .await
            .provisioning_requests
            .upsert(request)?;
        self.emit(event);
        Ok(stored)
    }

    async fn mark_provisioning_request_deleted(&self, name: &str) -> Result<(), StoreError> {
        let event = {
            let mut guard = self.inner.write().await;
            let Some(mut existing) = guard.provisioning_requests.get("", name) else {
                return Ok(());
            };
            if existing.metadata.is_deleting() {
                return Ok(());
            }
            existing.metadata.deletion_timestamp = Some(Utc::now());
            if existing.metadata.finalizers.is_empty() {
                guard.provisioning_requests.remove("", name)
            } else {
                existing.metadata.resource_version += 1;
                guard
                    .provisioning_requests
                    .items
                    .insert((String::new(), name.to_string()), existing);
                Some(StoreEvent {
                    kind: ObjectKind::ProvisioningRequest,
                    namespace: String::new(),
                    name: name.to_string(),
                    spec_changed: false,
                    status_changed: false,
                    deleted: true,
                })
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn get_cluster_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterTemplate>, StoreError> {
        Ok(self.inner.read().await.cluster_templates.get(namespace, name))
    }

    async fn list_cluster_templates(&self) -> Result<Vec<ClusterTemplate>, StoreError> {
        Ok(self.inner.read().await.cluster_templates.list())
    }

    async fn upsert_cluster_template(
        &self,
        template: &ClusterTemplate,
    ) -> Result<ClusterTemplate, StoreError> {
        let (stored, event) = self.inner.write().await.cluster_templates.upsert(template)?;
        self.emit(event);
        Ok(stored)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        Ok(self.inner.read().await.config_maps.get(namespace, name))
    }

    async fn upsert_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let (stored, event) = {
            let mut guard = self.inner.write().await;
            if let Some(existing) = guard
                .config_maps
                .get(&config_map.metadata.namespace, &config_map.metadata.name)
            {
                if existing.immutable && existing.data != config_map.data {
                    return Err(StoreError::Immutable {
                        name: config_map.metadata.name.clone(),
                    });
                }
            }
            guard.config_maps.upsert(config_map)?
        };
        self.emit(event);
        Ok(stored)
    }

    async fn get_node_allocation_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NodeAllocationRequest>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .node_allocation_requests
            .get(namespace, name))
    }

    async fn upsert_node_allocation_request(
        &self,
        request: &NodeAllocationRequest,
    ) -> Result<NodeAllocationRequest, StoreError> {
        let (stored, event) = self
            .inner
            .write()
            .await
            .node_allocation_requests
            .upsert(request)?;
        self.emit(event);
        Ok(stored)
    }

    async fn delete_node_allocation_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let event = self
            .inner
            .write()
            .await
            .node_allocation_requests
            .remove(namespace, name);
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn get_cluster_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterInstance>, StoreError> {
        Ok(self.inner.read().await.cluster_instances.get(namespace, name))
    }

    async fn upsert_cluster_instance(
        &self,
        instance: &ClusterInstance,
    ) -> Result<ClusterInstance, StoreError> {
        let (stored, event) = self.inner.write().await.cluster_instances.upsert(instance)?;
        self.emit(event);
        Ok(stored)
    }

    async fn delete_cluster_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let event = self
            .inner
            .write()
            .await
            .cluster_instances
            .remove(namespace, name);
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn get_managed_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ManagedCluster>, StoreError> {
        Ok(self.inner.read().await.managed_clusters.get("", name))
    }

    async fn upsert_managed_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ManagedCluster, StoreError> {
        let (stored, event) = self.inner.write().await.managed_clusters.upsert(cluster)?;
        self.emit(event);
        Ok(stored)
    }

    async fn list_policies(&self, namespace: &str) -> Result<Vec<Policy>, StoreError> {
        Ok(self.inner.read().await.policies.list_namespace(namespace))
    }

    async fn upsert_policy(&self, policy: &Policy) -> Result<Policy, StoreError> {
        let (stored, event) = self.inner.write().await.policies.upsert(policy)?;
        self.emit(event);
        Ok(stored)
    }

    async fn get_bare_metal_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BareMetalHost>, StoreError> {
        Ok(self.inner.read().await.bare_metal_hosts.get(namespace, name))
    }

    async fn upsert_bare_metal_host(
        &self,
        host: &BareMetalHost,
    ) -> Result<BareMetalHost, StoreError> {
        let (stored, event) = self.inner.write().await.bare_metal_hosts.upsert(host)?;
        self.emit(event);
        Ok(stored)
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2ims_domain::{
        ProvisioningRequestSpec, ProvisioningRequestStatus, Timeouts, PROVISIONING_FINALIZER,
    };

    fn dummy_request(name: &str) -> ProvisioningRequest {
        ProvisioningRequest {
            metadata: ObjectMeta::named(name),
            spec: ProvisioningRequestSpec {
                template_name: "sno".into(),
                template_version: "v1".into(),
                template_parameters: Value::Null,
                timeouts: Timeouts::default(),
            },
            status: ProvisioningRequestStatus::default(),
        }
    }

    #[tokio::test]
    async fn upsert_assigns_version_and_generation() {
        let store = InMemoryStore::new();
        let stored = store
            .upsert_provisioning_request(&dummy_request("b9a0c1d2-0000-4000-8000-000000000001"))
            .await
            .unwrap();
        assert_eq!(stored.metadata.resource_version, 1);
        assert_eq!(stored.metadata.generation, 1);
        assert!(stored.metadata.uid.is_some());
        assert!(stored.metadata.creation_timestamp.is_some());
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = InMemoryStore::new();
        let stored = store
            .upsert_provisioning_request(&dummy_request("b9a0c1d2-0000-4000-8000-000000000002"))
            .await
            .unwrap();

        // First writer wins.
        store.upsert_provisioning_request(&stored).await.unwrap();

        // Second write of the same snapshot carries a stale version.
        let err = store.upsert_provisioning_request(&stored).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn generation_bumps_only_on_spec_change() {
        let store = InMemoryStore::new();
        let mut stored = store
            .upsert_provisioning_request(&dummy_request("b9a0c1d2-0000-4000-8000-000000000003"))
            .await
            .unwrap();

        // Status-only write: generation stays put.
        stored.status.observed_generation = 1;
        let stored = store.upsert_provisioning_request(&stored).await.unwrap();
        assert_eq!(stored.metadata.generation, 1);

        // Spec write: generation advances.
        let mut changed = stored.clone();
        changed.spec.template_version = "v2".into();
        let changed = store.upsert_provisioning_request(&changed).await.unwrap();
        assert_eq!(changed.metadata.generation, 2);
    }

    #[tokio::test]
    async fn deletion_waits_for_finalizers() {
        let store = InMemoryStore::new();
        let name = "b9a0c1d2-0000-4000-8000-000000000004";
        let mut req = dummy_request(name);
        req.metadata.add_finalizer(PROVISIONING_FINALIZER);
        let stored = store.upsert_provisioning_request(&req).await.unwrap();

        store.mark_provisioning_request_deleted(name).await.unwrap();
        let mut fetched = store
            .get_provisioning_request(name)
            .await
            .unwrap()
            .expect("retained while finalizer present");
        assert!(fetched.metadata.is_deleting());
        assert!(fetched.metadata.resource_version > stored.metadata.resource_version);

        fetched.metadata.remove_finalizer(PROVISIONING_FINALIZER);
        store.upsert_provisioning_request(&fetched).await.unwrap();
        assert!(store
            .get_provisioning_request(name)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn watch_reports_change_flags() {
        let store = InMemoryStore::new();
        let mut rx = store.watch();

        let stored = store
            .upsert_provisioning_request(&dummy_request("b9a0c1d2-0000-4000-8000-000000000005"))
            .await
            .unwrap();
        let created = rx.recv().await.unwrap();
        assert!(created.spec_changed && !created.deleted);

        let mut status_only = stored.clone();
        status_only.status.observed_generation = 3;
        store.upsert_provisioning_request(&status_only).await.unwrap();
        let updated = rx.recv().await.unwrap();
        assert!(!updated.spec_changed);
        assert!(updated.status_changed);
    }

    #[tokio::test]
    async fn immutable_config_map_rejects_data_changes() {
        let store = InMemoryStore::new();
        let mut cm = ConfigMap {
            metadata: ObjectMeta::namespaced("templates", "sno-defaults"),
            data: BTreeMap::from([("clusterinstance-defaults".into(), "a: 1\n".into())]),
            immutable: false,
        };
        cm = store.upsert_config_map(&cm).await.unwrap();
        cm.immutable = true;
        cm = store.upsert_config_map(&cm).await.unwrap();

        let mut mutated = cm.clone();
        mutated
            .data
            .insert("clusterinstance-defaults".into(), "a: 2\n".into());
        let err = store.upsert_config_map(&mutated).await.unwrap_err();
        assert!(matches!(err, StoreError::Immutable { .. }));

        // Metadata-only writes still go through.
        let mut labeled = cm.clone();
        labeled.metadata.labels.insert("tier".into(), "defaults".into());
        store.upsert_config_map(&labeled).await.unwrap();
    }

    #[tokio::test]
    async fn policies_listed_per_namespace() {
        use o2ims_domain::{PolicySpec, PolicyStatus, RemediationAction};
        let store = InMemoryStore::new();
        for (ns, name) in [("edge-1", "a"), ("edge-1", "b"), ("edge-2", "c")] {
            store
                .upsert_policy(&Policy {
                    metadata: ObjectMeta::namespaced(ns, name),
                    spec: PolicySpec { remediation_action: RemediationAction::Inform },
                    status: PolicyStatus::default(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.list_policies("edge-1").await.unwrap().len(), 2);
        assert_eq!(store.list_policies("edge-2").await.unwrap().len(), 1);
    }
}
