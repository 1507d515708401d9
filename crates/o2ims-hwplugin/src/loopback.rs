use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PluginError;
use crate::plugin::{AllocatedNode, AllocationPhase, AllocationStatus, HardwarePlugin};

#[derive(Debug, Clone)]
struct Allocation {
    status: AllocationStatus,
    nodes: Vec<AllocatedNode>,
}

#[derive(Debug, Default)]
struct Inner {
    allocations: HashMap<String, Allocation>,
    unavailable: bool,
}

/// A plugin that serves scripted allocations from memory.
///
/// Performs no I/O. Tests (and hardware-less development runs) drive it by
/// completing or failing allocations explicitly; unknown allocations report
/// InProgress so a freshly created request simply waits.
#[derive(Debug, Default)]
pub struct LoopbackPlugin {
    inner: Mutex<Inner>,
}

pub const LOOPBACK_PLUGIN: &str = "loopback";

impl LoopbackPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` provisioned with the given nodes.
    pub fn complete(&self, id: &str, nodes: Vec<AllocatedNode>) {
        let node_names = nodes.iter().map(|n| n.hostname.clone()).collect();
        self.inner.lock().unwrap().allocations.insert(
            id.to_string(),
            Allocation {
                status: AllocationStatus {
                    phase: AllocationPhase::Provisioned,
                    message: "all nodes allocated".to_string(),
                    node_names,
                },
                nodes,
            },
        );
    }

    /// Mark `id` failed on the plugin side.
    pub fn fail(&self, id: &str, message: impl Into<String>) {
        self.inner.lock().unwrap().allocations.insert(
            id.to_string(),
            Allocation {
                status: AllocationStatus {
                    phase: AllocationPhase::Failed,
                    message: message.into(),
                    node_names: Vec::new(),
                },
                nodes: Vec::new(),
            },
        );
    }

    /// Simulate a plugin outage: every query fails transiently until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    fn check_available(&self) -> Result<(), PluginError> {
        if self.inner.lock().unwrap().unavailable {
            return Err(PluginError::Unavailable("loopback outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HardwarePlugin for LoopbackPlugin {
    fn name(&self) -> &str {
        LOOPBACK_PLUGIN
    }

    async fn query_allocation(&self, id: &str) -> Result<AllocationStatus, PluginError> {
        self.check_available()?;
        debug!(%id, "LoopbackPlugin: query_allocation");
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .allocations
            .get(id)
            .map(|a| a.status.clone())
            .unwrap_or(AllocationStatus {
                phase: AllocationPhase::InProgress,
                message: "allocation pending".to_string(),
                node_names: Vec::new(),
            }))
    }

    async fn query_allocated_nodes(&self, id: &str) -> Result<Vec<AllocatedNode>, PluginError> {
        self.check_available()?;
        debug!(%id, "LoopbackPlugin: query_allocated_nodes");
        let guard = self.inner.lock().unwrap();
        guard
            .allocations
            .get(id)
            .map(|a| a.nodes.clone())
            .ok_or_else(|| PluginError::UnknownAllocation(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, hostname: &str) -> AllocatedNode {
        AllocatedNode {
            id: id.to_string(),
            bmh_name: format!("bmh-{id}"),
            bmh_namespace: "hardware".to_string(),
            hostname: hostname.to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_allocation_reports_in_progress() {
        let plugin = LoopbackPlugin::new();
        let status = plugin.query_allocation("nar-1").await.unwrap();
        assert_eq!(status.phase, AllocationPhase::InProgress);
    }

    #[tokio::test]
    async fn completed_allocation_serves_nodes() {
        let plugin = LoopbackPlugin::new();
        plugin.complete("nar-1", vec![node("n0", "edge-1-node-0.example.com")]);

        let status = plugin.query_allocation("nar-1").await.unwrap();
        assert_eq!(status.phase, AllocationPhase::Provisioned);

        let nodes = plugin.query_allocated_nodes("nar-1").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].bmh_name, "bmh-n0");
    }

    #[tokio::test]
    async fn outage_is_transient() {
        let plugin = LoopbackPlugin::new();
        plugin.set_unavailable(true);
        assert!(plugin.query_allocation("x").await.unwrap_err().is_transient());
        plugin.set_unavailable(false);
        assert!(plugin.query_allocation("x").await.is_ok());
    }
}
