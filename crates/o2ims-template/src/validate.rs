use tracing::{info, warn};
use uuid::Uuid;

use o2ims_domain::{
    set_condition, ClusterTemplate, ConditionReason, ConditionStatus, ConditionType,
    CLUSTER_INSTANCE_DEFAULTS_KEY, HARDWARE_TEMPLATE_KEY, POLICY_TEMPLATE_DEFAULTS_KEY,
};
use o2ims_store::{StateStore, StoreError};

use crate::error::TemplateError;
use crate::resolve::parse_hardware_template;

/// Validate a ClusterTemplate and return the copy to persist on success:
/// template id assigned when empty, referenced ConfigMaps frozen.
///
/// Checks, in order: metadata name equals `<name>.<version>`;
/// `<name>.<version>` collides with no template in another namespace; the
/// parameter schema is an object; every referenced ConfigMap exists, exposes
/// its well-known key, and decodes.
pub async fn validate_cluster_template(
    store: &dyn StateStore,
    template: &ClusterTemplate,
) -> Result<ClusterTemplate, TemplateError> {
    let expected = template.canonical_name();
    if template.metadata.name != expected {
        return Err(TemplateError::MetadataNameMismatch {
            actual: template.metadata.name.clone(),
            expected,
        });
    }

    for other in store.list_cluster_templates().await? {
        let same_name_version =
            other.spec.name == template.spec.name && other.spec.version == template.spec.version;
        if same_name_version && other.metadata.namespace != template.metadata.namespace {
            return Err(TemplateError::DuplicateTemplate {
                key: expected,
                namespace: other.metadata.namespace,
            });
        }
    }

    if !template.spec.template_parameter_schema.is_object() {
        return Err(TemplateError::InvalidParameterSchema(
            "schema is not an object".to_string(),
        ));
    }

    let namespace = &template.metadata.namespace;
    freeze_config_map(
        store,
        namespace,
        &template.spec.templates.cluster_instance_defaults,
        CLUSTER_INSTANCE_DEFAULTS_KEY,
    )
    .await?;
    freeze_config_map(
        store,
        namespace,
        &template.spec.templates.policy_template_defaults,
        POLICY_TEMPLATE_DEFAULTS_KEY,
    )
    .await?;
    if let Some(name) = &template.spec.templates.hardware_template {
        let data = freeze_config_map(store, namespace, name, HARDWARE_TEMPLATE_KEY).await?;
        parse_hardware_template(name, data)?;
    }

    let mut validated = template.clone();
    if validated.spec.template_id.is_none() {
        validated.spec.template_id = Some(Uuid::new_v4());
    }
    Ok(validated)
}

/// Decode the ConfigMap's well-known entry and mark the map immutable.
/// Returns the decoded data.
async fn freeze_config_map(
    store: &dyn StateStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<serde_json::Value, TemplateError> {
    let mut cm = store
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
    let data = serde_yaml::from_str::<serde_json::Value>(raw).map_err(|e| {
        TemplateError::DataDecode {
            name: name.to_string(),
            message: e.to_string(),
        }
    })?;

    if !cm.immutable {
        cm.immutable = true;
        store.upsert_config_map(&cm).await?;
    }
    Ok(data)
}

/// Re-run validation for one template and stamp its Validated condition.
/// Driven by template and ConfigMap events.
pub async fn revalidate(
    store: &dyn StateStore,
    namespace: &str,
    name: &str,
) -> Result<(), StoreError> {
    let Some(template) = store.get_cluster_template(namespace, name).await? else {
        return Ok(());
    };

    match validate_cluster_template(store, &template).await {
        Ok(mut validated) => {
            set_condition(
                &mut validated.status.conditions,
                ConditionType::Validated,
                ConditionStatus::True,
                ConditionReason::Completed,
                "template validated",
            );
            if validated != template {
                info!(template = %template.metadata.name, "template validated");
                store.upsert_cluster_template(&validated).await?;
            }
        }
        Err(TemplateError::Store(e)) => return Err(e),
        Err(e) => {
            warn!(template = %template.metadata.name, error = %e, "template validation failed");
            let mut failed = template.clone();
            set_condition(
                &mut failed.status.conditions,
                ConditionType::Validated,
                ConditionStatus::False,
                ConditionReason::Failed,
                e.to_string(),
            );
            if failed != template {
                store.upsert_cluster_template(&failed).await?;
            }
        }
    }
    Ok(())
}
