//! Canned templates and requests for exercising the resolver and the
//! reconcile pipeline in tests.

use std::collections::BTreeMap;

use serde_json::json;
use uuid::Uuid;

use o2ims_domain::{
    set_condition, ClusterTemplate, ClusterTemplateSpec, ClusterTemplateStatus, ConditionReason,
    ConditionStatus, ConditionType, ConfigMap, ObjectMeta, ProvisioningRequest,
    ProvisioningRequestSpec, ProvisioningRequestStatus, TemplateDataRefs, Timeouts,
};
use o2ims_store::StateStore;

pub const TEMPLATE_NAMESPACE: &str = "cluster-templates";
pub const INSTALL_DEFAULTS_CM: &str = "sno-install-defaults";
pub const POLICY_DEFAULTS_CM: &str = "sno-policy-defaults";
pub const HARDWARE_TEMPLATE_CM: &str = "sno-hw-template";

/// Seed a validated `sno.v1` template with its three ConfigMaps. Returns the
/// stored template.
pub async fn seed_template(store: &dyn StateStore, with_hardware: bool) -> ClusterTemplate {
    store
        .upsert_config_map(&ConfigMap {
            metadata: ObjectMeta::namespaced(TEMPLATE_NAMESPACE, INSTALL_DEFAULTS_CM),
            data: BTreeMap::from([(
                "clusterinstance-defaults".to_string(),
                concat!(
                    "baseDomain: lab.example.com\n",
                    "networkType: OVNKubernetes\n",
                    "machineNetwork:\n",
                    "  cidr: 192.168.32.0/24\n",
                )
                .to_string(),
            )]),
            immutable: false,
        })
        .await
        .unwrap();

    store
        .upsert_config_map(&ConfigMap {
            metadata: ObjectMeta::namespaced(TEMPLATE_NAMESPACE, POLICY_DEFAULTS_CM),
            data: BTreeMap::from([(
                "policytemplate-defaults".to_string(),
                "cpu-isolated: 0-31\ncpu-reserved: 0-1\n".to_string(),
            )]),
            immutable: false,
        })
        .await
        .unwrap();

    store
        .upsert_config_map(&ConfigMap {
            metadata: ObjectMeta::namespaced(TEMPLATE_NAMESPACE, HARDWARE_TEMPLATE_CM),
            data: BTreeMap::from([(
                "node-groups".to_string(),
                concat!(
                    "hardwarePluginRef: loopback\n",
                    "nodeGroups:\n",
                    "  - name: controller\n",
                    "    role: master\n",
                    "    hardwareProfile: profile-spr-single-processor-64G\n",
                    "    resourcePoolId: xlab-pool-1\n",
                )
                .to_string(),
            )]),
            immutable: false,
        })
        .await
        .unwrap();

    let mut status = ClusterTemplateStatus::default();
    set_condition(
        &mut status.conditions,
        ConditionType::Validated,
        ConditionStatus::True,
        ConditionReason::Completed,
        "template validated",
    );

    let template = ClusterTemplate {
        metadata: ObjectMeta::namespaced(TEMPLATE_NAMESPACE, "sno.v1"),
        spec: ClusterTemplateSpec {
            name: "sno".into(),
            version: "v1".into(),
            template_id: Some(Uuid::parse_str("4c9e8f10-2f14-4b4e-9c2d-0c70a7a30a11").unwrap()),
            release: "4.18.0".into(),
            templates: TemplateDataRefs {
                cluster_instance_defaults: INSTALL_DEFAULTS_CM.into(),
                policy_template_defaults: POLICY_DEFAULTS_CM.into(),
                hardware_template: with_hardware.then(|| HARDWARE_TEMPLATE_CM.to_string()),
            },
            template_parameter_schema: json!({
                "type": "object",
                "required": ["clusterInstanceParameters"],
                "properties": {
                    "clusterInstanceParameters": {
                        "type": "object",
                        "additionalProperties": true,
                        "required": ["clusterName"],
                        "properties": { "clusterName": { "type": "string" } }
                    },
                    "policyTemplateParameters": {
                        "type": "object",
                        "additionalProperties": true
                    }
                }
            }),
        },
        status,
    };
    store.upsert_cluster_template(&template).await.unwrap()
}

/// A request for `sno.v1` provisioning `cluster` with one master node.
pub fn template_request(cluster: &str) -> ProvisioningRequest {
    ProvisioningRequest {
        metadata: ObjectMeta::named(Uuid::new_v4().to_string()),
        spec: ProvisioningRequestSpec {
            template_name: "sno".into(),
            template_version: "v1".into(),
            template_parameters: json!({
                "clusterInstanceParameters": {
                    "clusterName": cluster,
                    "baseDomain": "example.com",
                    "nodes": [
                        { "hostname": format!("{cluster}-node-0.example.com"), "role": "master" }
                    ]
                },
                "policyTemplateParameters": { "cpu-isolated": "2-31" }
            }),
            timeouts: Timeouts::default(),
        },
        status: ProvisioningRequestStatus::default(),
    }
}
