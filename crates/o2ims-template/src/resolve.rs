use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use o2ims_domain::{
    ClusterTemplate, NodeGroup, ProvisioningRequest, CLUSTER_INSTANCE_DEFAULTS_KEY,
    CLUSTER_INSTANCE_PARAMETERS, HARDWARE_TEMPLATE_KEY, POLICY_TEMPLATE_DEFAULTS_KEY,
    POLICY_TEMPLATE_PARAMETERS,
};
use o2ims_store::StateStore;

use crate::error::TemplateError;
use crate::render::deep_merge;

/// One node from the rendered cluster input.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub hostname: String,
    pub role: String,
    pub node_network: Option<Value>,
    pub labels: BTreeMap<String, String>,
}

/// The node-group layout from the hardware template, with sizes filled in
/// from the rendered cluster input.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareLayout {
    pub hardware_plugin_ref: String,
    pub node_groups: Vec<NodeGroup>,
}

/// Everything the downstream stages need, rendered from one request.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub template_id: Uuid,
    pub template_namespace: String,
    pub template_key: String,
    pub release: String,
    pub cluster_name: String,
    /// Install-time values: defaults merged with clusterInstanceParameters.
    pub cluster_input: Value,
    /// Post-install values: defaults merged with policyTemplateParameters.
    pub policy_input: Value,
    pub nodes: Vec<NodeInput>,
    /// Absent for hardware-less templates.
    pub hardware: Option<HardwareLayout>,
}

/// Locate the template a request references: metadata name `<name>.<version>`,
/// unique across namespaces.
pub async fn find_template(
    store: &dyn StateStore,
    key: &str,
) -> Result<ClusterTemplate, TemplateError> {
    let mut matches: Vec<ClusterTemplate> = store
        .list_cluster_templates()
        .await?
        .into_iter()
        .filter(|t| t.metadata.name == key)
        .collect();
    match matches.len() {
        0 => Err(TemplateError::TemplateNotFound(key.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(TemplateError::AmbiguousTemplate { key: key.to_string() }),
    }
}

/// Render a request into concrete desired inputs.
///
/// Deterministic: identical template, ConfigMap, and parameter content always
/// produces byte-identical `cluster_input` / `policy_input`.
pub async fn resolve(
    store: &dyn StateStore,
    request: &ProvisioningRequest,
) -> Result<ResolvedRequest, TemplateError> {
    let key = request.spec.template_key();
    let template = find_template(store, &key).await?;
    if !template.is_validated() {
        return Err(TemplateError::TemplateNotValidated(key));
    }
    let template_id = template
        .spec
        .template_id
        .ok_or_else(|| TemplateError::TemplateIdMissing(key.clone()))?;

    let namespace = template.metadata.namespace.clone();
    let install_defaults = decode_data(
        store,
        &namespace,
        &template.spec.templates.cluster_instance_defaults,
        CLUSTER_INSTANCE_DEFAULTS_KEY,
    )
    .await?;
    let policy_defaults = decode_data(
        store,
        &namespace,
        &template.spec.templates.policy_template_defaults,
        POLICY_TEMPLATE_DEFAULTS_KEY,
    )
    .await?;

    let params = o2ims_schema::validate_and_default(
        &template.spec.template_parameter_schema,
        &request.spec.template_parameters,
    )?;
    let empty = Value::Object(Default::default());
    let install_params = params.get(CLUSTER_INSTANCE_PARAMETERS).unwrap_or(&empty);
    let policy_params = params.get(POLICY_TEMPLATE_PARAMETERS).unwrap_or(&empty);

    let cluster_input = deep_merge(&install_defaults, install_params);
    let policy_input = deep_merge(&policy_defaults, policy_params);

    let cluster_name = cluster_input
        .get("clusterName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(TemplateError::MissingClusterName)?
        .to_string();
    let nodes = node_inputs(&cluster_input)?;

    let hardware = match &template.spec.templates.hardware_template {
        Some(name) => Some(hardware_layout(store, &namespace, name, &nodes).await?),
        None => None,
    };

    debug!(
        request = %request.metadata.name,
        template = %key,
        cluster = %cluster_name,
        nodes = nodes.len(),
        hardware = hardware.is_some(),
        "resolved template"
    );

    Ok(ResolvedRequest {
        template_id,
        template_namespace: namespace,
        template_key: key,
        release: template.spec.release.clone(),
        cluster_name,
        cluster_input,
        policy_input,
        nodes,
        hardware,
    })
}

/// Fetch a ConfigMap and decode its well-known YAML entry.
async fn decode_data(
    store: &dyn StateStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Value, TemplateError> {
    let cm = store
        .get_config_map(namespace, name)
        .await?
        .ok_or_else(|| TemplateError::ConfigMapMissing {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
    let raw = cm
        .value(key)
        .ok_or_else(|| TemplateError::ConfigMapKeyMissing {
            name: name.to_string(),
            key: key.to_string(),
        })?;
    serde_yaml::from_str::<Value>(raw).map_err(|e| TemplateError::DataDecode {
        name: name.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawHardwareTemplate {
    pub(crate) hardware_plugin_ref: String,
    pub(crate) node_groups: Vec<RawNodeGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawNodeGroup {
    pub(crate) name: String,
    pub(crate) role: String,
    pub(crate) hardware_profile: String,
    pub(crate) resource_pool_id: String,
}

pub(crate) fn parse_hardware_template(
    name: &str,
    data: Value,
) -> Result<RawHardwareTemplate, TemplateError> {
    serde_json::from_value(data).map_err(|e| TemplateError::DataDecode {
        name: name.to_string(),
        message: e.to_string(),
    })
}

async fn hardware_layout(
    store: &dyn StateStore,
    namespace: &str,
    name: &str,
    nodes: &[NodeInput],
) -> Result<HardwareLayout, TemplateError> {
    let data = decode_data(store, namespace, name, HARDWARE_TEMPLATE_KEY).await?;
    let raw = parse_hardware_template(name, data)?;

    // Group sizes come from the rendered input, not the template.
    let node_groups = raw
        .node_groups
        .into_iter()
        .map(|g| {
            let size = nodes.iter().filter(|n| n.role == g.role).count() as u32;
            NodeGroup {
                name: g.name,
                role: g.role,
                hardware_profile: g.hardware_profile,
                resource_pool_id: g.resource_pool_id,
                size,
            }
        })
        .collect();

    Ok(HardwareLayout {
        hardware_plugin_ref: raw.hardware_plugin_ref,
        node_groups,
    })
}

/// Extract and check the node list from a rendered cluster input.
pub fn node_inputs(cluster_input: &Value) -> Result<Vec<NodeInput>, TemplateError> {
    let Some(raw_nodes) = cluster_input.get("nodes") else {
        return Ok(Vec::new());
    };
    let raw_nodes = raw_nodes
        .as_array()
        .ok_or_else(|| TemplateError::InvalidNodeEntry {
            index: 0,
            message: "'nodes' is not an array".to_string(),
        })?;

    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for (index, raw) in raw_nodes.iter().enumerate() {
        let hostname = raw
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TemplateError::InvalidNodeEntry {
                index,
                message: "missing hostname".to_string(),
            })?;
        let role = match raw.get("role") {
            None => "master",
            Some(v) => v.as_str().ok_or_else(|| TemplateError::InvalidNodeEntry {
                index,
                message: "role is not a string".to_string(),
            })?,
        };
        let mut labels = BTreeMap::new();
        if let Some(raw_labels) = raw.get("labels") {
            let map = raw_labels
                .as_object()
                .ok_or_else(|| TemplateError::InvalidNodeEntry {
                    index,
                    message: "labels is not an object".to_string(),
                })?;
            for (k, v) in map {
                let v = v.as_str().ok_or_else(|| TemplateError::InvalidNodeEntry {
                    index,
                    message: format!("label '{}' is not a string", k),
                })?;
                labels.insert(k.clone(), v.to_string());
            }
        }
        nodes.push(NodeInput {
            hostname: hostname.to_string(),
            role: role.to_string(),
            node_network: raw.get("nodeNetwork").cloned(),
            labels,
        });
    }
    Ok(nodes)
}
