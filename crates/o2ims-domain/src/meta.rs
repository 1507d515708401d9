use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Object metadata ───────────────────────────────────────────────────────────

/// Metadata shared by every object in the hub store.
///
/// `namespace` is empty for cluster-scoped objects (ProvisioningRequest,
/// ManagedCluster). `resource_version` is owned by the store and used for
/// optimistic concurrency; `generation` is bumped by the store whenever the
/// spec changes, never on status-only writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: Option<Uuid>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set by the store on delete; the object is retained until its
    /// finalizers are removed.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        ObjectMeta { name: name.into(), ..Default::default() }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectMeta {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add `finalizer` if absent. Returns true when the list changed.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove `finalizer` if present. Returns true when the list changed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

// ── Conditions ────────────────────────────────────────────────────────────────

/// Condition types across all object kinds. Adding a variant is a deliberate
/// API change, not a convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Request-level: inputs accepted (name, parameters, template reference).
    Validated,
    /// Request-level: the referenced ClusterTemplate passed validation.
    ClusterTemplateValidated,
    /// Request-level: the NodeAllocationRequest spec was derived and written.
    HardwareTemplateRendered,
    /// Request-level: the hardware plugin reports all nodes allocated.
    HardwareProvisioned,
    /// Request-level: the ClusterInstance spec was rendered and applied.
    ClusterInstanceRendered,
    /// Request-level: the downstream installer reports the cluster installed.
    ClusterInstalled,
    /// Request-level: post-install policy configuration state.
    ConfigurationApplied,
    /// NodeAllocationRequest / ClusterInstance: downstream progress.
    Provisioned,
    /// ManagedCluster: availability as reported by the hub.
    Available,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionType::Validated => "Validated",
            ConditionType::ClusterTemplateValidated => "ClusterTemplateValidated",
            ConditionType::HardwareTemplateRendered => "HardwareTemplateRendered",
            ConditionType::HardwareProvisioned => "HardwareProvisioned",
            ConditionType::ClusterInstanceRendered => "ClusterInstanceRendered",
            ConditionType::ClusterInstalled => "ClusterInstalled",
            ConditionType::ConfigurationApplied => "ConfigurationApplied",
            ConditionType::Provisioned => "Provisioned",
            ConditionType::Available => "Available",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(self) -> bool {
        self == ConditionStatus::True
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionReason {
    InProgress,
    Completed,
    Failed,
    Missing,
    OutOfDate,
    TimedOut,
    ClusterNotReady,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionReason::InProgress => "InProgress",
            ConditionReason::Completed => "Completed",
            ConditionReason::Failed => "Failed",
            ConditionReason::Missing => "Missing",
            ConditionReason::OutOfDate => "OutOfDate",
            ConditionReason::TimedOut => "TimedOut",
            ConditionReason::ClusterNotReady => "ClusterNotReady",
            ConditionReason::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub ctype: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Set or update a condition in place.
///
/// `last_transition_time` advances only when the status value actually flips;
/// reason/message refreshes alone keep the original transition time so
/// timeout arithmetic anchored on it stays stable.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    ctype: ConditionType,
    status: ConditionStatus,
    reason: ConditionReason,
    message: impl Into<String>,
) {
    let message = message.into();
    let now = Utc::now();
    match conditions.iter_mut().find(|c| c.ctype == ctype) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
        }
        None => conditions.push(Condition {
            ctype,
            status,
            reason,
            message,
            last_transition_time: now,
        }),
    }
}

pub fn find_condition(conditions: &[Condition], ctype: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.ctype == ctype)
}

pub fn condition_is_true(conditions: &[Condition], ctype: ConditionType) -> bool {
    find_condition(conditions, ctype).map_or(false, |c| c.status.is_true())
}
