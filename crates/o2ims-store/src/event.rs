use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    ProvisioningRequest,
    ClusterTemplate,
    ConfigMap,
    NodeAllocationRequest,
    ClusterInstance,
    ManagedCluster,
    Policy,
    BareMetalHost,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::ProvisioningRequest => "ProvisioningRequest",
            ObjectKind::ClusterTemplate => "ClusterTemplate",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::NodeAllocationRequest => "NodeAllocationRequest",
            ObjectKind::ClusterInstance => "ClusterInstance",
            ObjectKind::ManagedCluster => "ManagedCluster",
            ObjectKind::Policy => "Policy",
            ObjectKind::BareMetalHost => "BareMetalHost",
        };
        write!(f, "{}", s)
    }
}

/// One change notification from the store. At-least-once; consumers must be
/// idempotent.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    /// The spec (generation-relevant content) changed with this write.
    pub spec_changed: bool,
    /// The status changed with this write.
    pub status_changed: bool,
    /// The object was marked for deletion or removed.
    pub deleted: bool,
}
