use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Where an allocation stands on the plugin side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPhase {
    InProgress,
    Provisioned,
    Failed,
}

/// Status of one node-allocation request as reported by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationStatus {
    pub phase: AllocationPhase,
    #[serde(default)]
    pub message: String,
    /// Stable once the phase is Provisioned.
    #[serde(default)]
    pub node_names: Vec<String>,
}

/// One physical machine granted in response to an allocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedNode {
    /// The hardware manager's stable node id.
    pub id: String,
    pub bmh_name: String,
    pub bmh_namespace: String,
    pub hostname: String,
}

/// The capability set a hardware backend must provide. Mutations travel
/// through the declarative NodeAllocationRequest resource; these calls are
/// read-only.
#[async_trait]
pub trait HardwarePlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn query_allocation(&self, id: &str) -> Result<AllocationStatus, PluginError>;

    async fn query_allocated_nodes(&self, id: &str) -> Result<Vec<AllocatedNode>, PluginError>;
}
