use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::meta::{condition_is_true, Condition, ConditionType, ObjectMeta};

// ── Well-known labels, annotations, keys ──────────────────────────────────────

/// Finalizer held on a ProvisioningRequest while owned children may exist.
pub const PROVISIONING_FINALIZER: &str = "clcm.openshift.io/provisioning-request-finalizer";

/// Owner label stamped on every NodeAllocationRequest and ClusterInstance
/// written for a request. Exactly one request may own a child.
pub const OWNER_LABEL: &str = "clcm.openshift.io/provisioning-request";

/// Post-install host-entry label: which hardware plugin allocated the node.
pub const HARDWARE_PLUGIN_REF_LABEL: &str = "clcm.openshift.io/hardwarePluginRef";

/// Post-install host-entry label: the hardware manager's stable node id.
pub const HW_MGR_NODE_ID_LABEL: &str = "clcm.openshift.io/hwMgrNodeId";

/// ManagedCluster label carrying the template id the cluster was built from.
pub const TEMPLATE_ARTIFACTS_LABEL: &str = "clcm.openshift.io/clusterTemplateArtifacts";

/// Label a child policy carries naming its bound managed cluster.
pub const CHILD_POLICY_CLUSTER_LABEL: &str = "policy.open-cluster-management.io/cluster-name";

/// Root-policy annotation enumerating the `<name>.<version>` template keys the
/// policy applies to, comma separated.
pub const CT_POLICY_TEMPLATES_ANNOTATION: &str = "clcm.openshift.io/ctPolicyTemplates";

/// Root policies for templates in namespace `ns` live in `ztp-<ns>`.
pub const ZTP_NAMESPACE_PREFIX: &str = "ztp-";

pub fn ztp_namespace(template_namespace: &str) -> String {
    format!("{}{}", ZTP_NAMESPACE_PREFIX, template_namespace)
}

/// ConfigMap key holding install-time default values (YAML).
pub const CLUSTER_INSTANCE_DEFAULTS_KEY: &str = "clusterinstance-defaults";

/// ConfigMap key holding post-install configuration default values (YAML).
pub const POLICY_TEMPLATE_DEFAULTS_KEY: &str = "policytemplate-defaults";

/// ConfigMap key holding the hardware template (YAML node-group layout).
pub const HARDWARE_TEMPLATE_KEY: &str = "node-groups";

/// User-parameter section merged into the install-time values.
pub const CLUSTER_INSTANCE_PARAMETERS: &str = "clusterInstanceParameters";

/// User-parameter section merged into the post-install values.
pub const POLICY_TEMPLATE_PARAMETERS: &str = "policyTemplateParameters";

// ── Provisioning phase ────────────────────────────────────────────────────────

/// Aggregate lifecycle phase of a ProvisioningRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProvisioningPhase {
    /// Before the first successful validation.
    #[default]
    Pending,
    /// Some stage is still converging.
    Progressing,
    /// Installed and configuration fully applied.
    Fulfilled,
    /// Input error, phase timeout, or ownership conflict.
    Failed,
    /// Finalization in progress.
    Deleting,
}

impl std::fmt::Display for ProvisioningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningPhase::Pending => "Pending",
            ProvisioningPhase::Progressing => "Progressing",
            ProvisioningPhase::Fulfilled => "Fulfilled",
            ProvisioningPhase::Failed => "Failed",
            ProvisioningPhase::Deleting => "Deleting",
        };
        write!(f, "{}", s)
    }
}

// ── Timeouts ──────────────────────────────────────────────────────────────────

/// Per-request timeout overrides, in minutes. Absent fields use the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_provisioning: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_provisioning: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_configuration: Option<u32>,
}

pub const DEFAULT_HARDWARE_PROVISIONING_MINUTES: u32 = 60;
pub const DEFAULT_CLUSTER_PROVISIONING_MINUTES: u32 = 60;
pub const DEFAULT_CLUSTER_CONFIGURATION_MINUTES: u32 = 20;

impl Timeouts {
    pub fn hardware_provisioning(&self) -> Duration {
        Duration::minutes(
            self.hardware_provisioning
                .unwrap_or(DEFAULT_HARDWARE_PROVISIONING_MINUTES) as i64,
        )
    }

    pub fn cluster_provisioning(&self) -> Duration {
        Duration::minutes(
            self.cluster_provisioning
                .unwrap_or(DEFAULT_CLUSTER_PROVISIONING_MINUTES) as i64,
        )
    }

    pub fn cluster_configuration(&self) -> Duration {
        Duration::minutes(
            self.cluster_configuration
                .unwrap_or(DEFAULT_CLUSTER_CONFIGURATION_MINUTES) as i64,
        )
    }
}

// ── ProvisioningRequest ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestSpec {
    pub template_name: String,
    pub template_version: String,
    /// Opaque user parameters, validated against the template schema.
    #[serde(default)]
    pub template_parameters: Value,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl ProvisioningRequestSpec {
    /// The `<name>.<version>` key of the referenced template.
    pub fn template_key(&self) -> String {
        format!("{}.{}", self.template_name, self.template_version)
    }
}

/// Reference to the NodeAllocationRequest created for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestRef {
    pub name: String,
    pub namespace: String,
    pub hardware_plugin_ref: String,
}

/// Snapshot of one child policy bound to the installed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyObservation {
    pub policy_name: String,
    pub policy_namespace: String,
    pub remediation_action: RemediationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceState>,
    /// Whether the policy's root is annotated with this request's template.
    pub expected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningStatusSummary {
    #[serde(default)]
    pub phase: ProvisioningPhase,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

/// Non-condition request status: references, derived maps, and the persisted
/// phase timers. Timers are written on first non-terminal observation and are
/// never re-armed; crash-restart re-derives everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_allocation_request: Option<NodeAllocationRequestRef>,
    /// node-id → hostname for every allocated node.
    #[serde(default)]
    pub allocated_node_host_map: BTreeMap<String, String>,
    #[serde(default)]
    pub policies: Vec<PolicyObservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_provisioning_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_provision_started_at: Option<DateTime<Utc>>,
    /// When configuration was first observed unsatisfied while the cluster
    /// was ready. Cleared on Completed, Missing, and the all-inform sweep;
    /// preserved while the cluster is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_compliant_at: Option<DateTime<Utc>>,
    /// Consecutive hardware-plugin call failures, for the retry ladder.
    #[serde(default)]
    pub hardware_plugin_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub provisioning: ProvisioningStatusSummary,
    #[serde(default)]
    pub extensions: RequestExtensions,
    #[serde(default)]
    pub observed_generation: i64,
}

/// The user-declared desired end-state for one managed cluster.
///
/// The name must be a UUID; it is the cluster's stable identifier for the
/// upstream management system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub metadata: ObjectMeta,
    pub spec: ProvisioningRequestSpec,
    #[serde(default)]
    pub status: ProvisioningRequestStatus,
}

impl ProvisioningRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if Uuid::parse_str(&self.metadata.name).is_err() {
            return Err(DomainError::InvalidRequestName(self.metadata.name.clone()));
        }
        if self.spec.template_name.is_empty() || self.spec.template_version.is_empty() {
            return Err(DomainError::InvalidTemplateReference(
                self.spec.template_key(),
            ));
        }
        Ok(())
    }

    pub fn condition_true(&self, ctype: ConditionType) -> bool {
        condition_is_true(&self.status.conditions, ctype)
    }
}

// ── ClusterTemplate ───────────────────────────────────────────────────────────

/// Names of the data blobs a template references. All are ConfigMaps in the
/// template's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDataRefs {
    pub cluster_instance_defaults: String,
    pub policy_template_defaults: String,
    /// Absent for hardware-less templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateSpec {
    pub name: String,
    pub version: String,
    /// Externally stable id; assigned on first successful validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    pub release: String,
    pub templates: TemplateDataRefs,
    /// JSON-Schema governing the request's templateParameters.
    pub template_parameter_schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A versioned, schema-bearing blueprint consumed by ProvisioningRequests.
/// Shared, never owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTemplate {
    pub metadata: ObjectMeta,
    pub spec: ClusterTemplateSpec,
    #[serde(default)]
    pub status: ClusterTemplateStatus,
}

impl ClusterTemplate {
    /// The `<name>.<version>` key; must equal the metadata name.
    pub fn canonical_name(&self) -> String {
        format!("{}.{}", self.spec.name, self.spec.version)
    }

    pub fn is_validated(&self) -> bool {
        condition_is_true(&self.status.conditions, ConditionType::Validated)
    }
}

// ── NodeAllocationRequest ─────────────────────────────────────────────────────

/// One homogeneous group of nodes requested from a hardware plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub name: String,
    pub role: String,
    pub hardware_profile: String,
    pub resource_pool_id: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestSpec {
    pub hardware_plugin_ref: String,
    pub node_groups: Vec<NodeGroup>,
}

impl NodeAllocationRequestSpec {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.node_groups.is_empty() {
            return Err(DomainError::EmptyNodeGroups);
        }
        for (i, g) in self.node_groups.iter().enumerate() {
            if self.node_groups[..i].iter().any(|o| o.name == g.name) {
                return Err(DomainError::DuplicateNodeGroup(g.name.clone()));
            }
        }
        Ok(())
    }

    pub fn total_size(&self) -> u32 {
        self.node_groups.iter().map(|g| g.size).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Stable once Provisioned, until explicit deallocation.
    #[serde(default)]
    pub node_names: Vec<String>,
}

/// The abstract hardware request submitted to a plugin. Exclusively owned by
/// one ProvisioningRequest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAllocationRequest {
    pub metadata: ObjectMeta,
    pub spec: NodeAllocationRequestSpec,
    #[serde(default)]
    pub status: NodeAllocationRequestStatus,
}

// ── ClusterInstance ───────────────────────────────────────────────────────────

/// One installer host entry, populated from the rendered input and (when
/// hardware is in play) the allocated node's bare-metal record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEntry {
    pub hostname: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_network: Option<Value>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstanceSpec {
    pub cluster_name: String,
    pub release: String,
    /// The rendered install-time values, keys lexicographic.
    pub values: Value,
    #[serde(default)]
    pub nodes: Vec<HostEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstanceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The downstream installer's desired-state object. Exclusively owned by one
/// ProvisioningRequest; spec is re-rendered and patched on every reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInstance {
    pub metadata: ObjectMeta,
    pub spec: ClusterInstanceSpec,
    #[serde(default)]
    pub status: ClusterInstanceStatus,
}

// ── ManagedCluster ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The downstream cluster as observed on the hub. Cluster-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedCluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: ManagedClusterStatus,
}

impl ManagedCluster {
    pub fn is_available(&self) -> bool {
        condition_is_true(&self.status.conditions, ConditionType::Available)
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationAction {
    Inform,
    Enforce,
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationAction::Inform => write!(f, "inform"),
            RemediationAction::Enforce => write!(f, "enforce"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceState {
    Compliant,
    NonCompliant,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub remediation_action: RemediationAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Absent until the propagator first evaluates the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceState>,
}

/// A governance policy. Roots live in `ztp-<template-namespace>`; children
/// are replicated into the managed cluster's namespace as
/// `<root-namespace>.<root-name>` with the cluster-name label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub metadata: ObjectMeta,
    pub spec: PolicySpec,
    #[serde(default)]
    pub status: PolicyStatus,
}

impl Policy {
    /// Whether this root policy is expected for the given `<name>.<version>`.
    pub fn expects_template(&self, template_key: &str) -> bool {
        self.metadata
            .annotation(CT_POLICY_TEMPLATES_ANNOTATION)
            .map_or(false, |v| v.split(',').any(|t| t.trim() == template_key))
    }

    /// The child name a root policy replicates to: `<namespace>.<name>`.
    pub fn child_name(&self) -> String {
        format!("{}.{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn bound_cluster(&self) -> Option<&str> {
        self.metadata.label(CHILD_POLICY_CLUSTER_LABEL)
    }
}

// ── ConfigMap / BareMetalHost ─────────────────────────────────────────────────

/// A named blob of string data. Template defaults are frozen (immutable) after
/// first successful template validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub immutable: bool,
}

impl ConfigMap {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    pub bmc_address: String,
    pub boot_mac_address: String,
}

/// The bare-metal operator's record for one physical machine. Read-only here;
/// BMC control is delegated to that operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BareMetalHost {
    pub metadata: ObjectMeta,
    pub spec: BareMetalHostSpec,
}
