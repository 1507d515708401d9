//! End-to-end passes over the reconcile pipeline against the in-memory store
//! and the loopback hardware plugin.

use std::sync::Arc;

use chrono::Duration;

use o2ims_domain::{
    find_condition, set_condition, BareMetalHost, BareMetalHostSpec, ComplianceState,
    ConditionReason, ConditionStatus, ConditionType, ManagedCluster, ManagedClusterStatus,
    ObjectMeta, Policy, PolicySpec, PolicyStatus, ProvisioningPhase, ProvisioningRequest,
    RemediationAction, CHILD_POLICY_CLUSTER_LABEL, CT_POLICY_TEMPLATES_ANNOTATION,
    HARDWARE_PLUGIN_REF_LABEL, HW_MGR_NODE_ID_LABEL, TEMPLATE_ARTIFACTS_LABEL,
};
use o2ims_hwplugin::{AllocatedNode, LoopbackPlugin, PluginRegistry};
use o2ims_reconciler::{reconcile_request, Context};
use o2ims_store::{InMemoryStore, StateStore};
use o2ims_template::testing::{seed_template, template_request, TEMPLATE_NAMESPACE};

struct Harness {
    store: Arc<InMemoryStore>,
    loopback: Arc<LoopbackPlugin>,
    ctx: Context,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let loopback = Arc::new(LoopbackPlugin::new());
        let mut registry = PluginRegistry::new();
        registry.register("loopback", loopback.clone());
        let ctx = Context::new(store.clone(), Arc::new(registry));
        Self { store, loopback, ctx }
    }

    async fn submit(&self, with_hardware: bool) -> ProvisioningRequest {
        seed_template(self.store.as_ref(), with_hardware).await;
        self.store
            .upsert_provisioning_request(&template_request("edge-1"))
            .await
            .unwrap()
    }

    async fn reconcile(&self, name: &str) -> o2ims_reconciler::Action {
        reconcile_request(&self.ctx, name).await.unwrap()
    }

    async fn request(&self, name: &str) -> ProvisioningRequest {
        self.store
            .get_provisioning_request(name)
            .await
            .unwrap()
            .expect("request exists")
    }

    /// Complete the loopback allocation with one node and its bare-metal
    /// record.
    async fn allocate_node(&self, request: &str, hostname: &str) {
        self.store
            .upsert_bare_metal_host(&BareMetalHost {
                metadata: ObjectMeta::namespaced("hardware", "bmh-0"),
                spec: BareMetalHostSpec {
                    bmc_address: "redfish://10.0.0.1/redfish/v1".into(),
                    boot_mac_address: "52:54:00:00:00:01".into(),
                },
            })
            .await
            .unwrap();
        self.loopback.complete(
            request,
            vec![AllocatedNode {
                id: "6f0e21f4-5a11-4840-9b52-0a4c11a20001".into(),
                bmh_name: "bmh-0".into(),
                bmh_namespace: "hardware".into(),
                hostname: hostname.into(),
            }],
        );
    }

    async fn finish_install(&self, cluster: &str) {
        let mut instance = self
            .store
            .get_cluster_instance(cluster, cluster)
            .await
            .unwrap()
            .expect("cluster instance exists");
        set_condition(
            &mut instance.status.conditions,
            ConditionType::Provisioned,
            ConditionStatus::True,
            ConditionReason::Completed,
            "install completed",
        );
        self.store.upsert_cluster_instance(&instance).await.unwrap();
    }

    async fn set_cluster_available(&self, cluster: &str, available: bool) {
        let mut mc = self
            .store
            .get_managed_cluster(cluster)
            .await
            .unwrap()
            .unwrap_or(ManagedCluster {
                metadata: ObjectMeta::named(cluster),
                status: ManagedClusterStatus::default(),
            });
        set_condition(
            &mut mc.status.conditions,
            ConditionType::Available,
            if available { ConditionStatus::True } else { ConditionStatus::False },
            if available { ConditionReason::Completed } else { ConditionReason::Unknown },
            "availability probe",
        );
        self.store.upsert_managed_cluster(&mc).await.unwrap();
    }

    async fn add_root_policy(&self, name: &str, remediation: RemediationAction) {
        let mut metadata =
            ObjectMeta::namespaced(format!("ztp-{TEMPLATE_NAMESPACE}"), name);
        metadata
            .annotations
            .insert(CT_POLICY_TEMPLATES_ANNOTATION.into(), "sno.v1".into());
        self.store
            .upsert_policy(&Policy {
                metadata,
                spec: PolicySpec { remediation_action: remediation },
                status: PolicyStatus::default(),
            })
            .await
            .unwrap();
    }

    async fn add_child_policy(
        &self,
        cluster: &str,
        root_name: &str,
        remediation: RemediationAction,
        compliance: Option<ComplianceState>,
    ) {
        let name = format!("ztp-{TEMPLATE_NAMESPACE}.{root_name}");
        let mut policy = self
            .store
            .list_policies(cluster)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.metadata.name == name)
            .unwrap_or_else(|| {
                let mut metadata = ObjectMeta::namespaced(cluster, &name);
                metadata.labels.insert(
                    CHILD_POLICY_CLUSTER_LABEL.into(),
                    cluster.into(),
                );
                Policy {
                    metadata,
                    spec: PolicySpec { remediation_action: remediation },
                    status: PolicyStatus::default(),
                }
            });
        policy.spec.remediation_action = remediation;
        policy.status.compliance = compliance;
        self.store.upsert_policy(&policy).await.unwrap();
    }

    /// Pull the configuration timer back in time to let a timeout fire
    /// without waiting for the wall clock.
    async fn backdate_non_compliant_at(&self, name: &str, minutes: i64) {
        let mut req = self.request(name).await;
        let at = req
            .status
            .extensions
            .non_compliant_at
            .expect("timer running");
        req.status.extensions.non_compliant_at = Some(at - Duration::minutes(minutes));
        self.store.upsert_provisioning_request(&req).await.unwrap();
    }
}

fn reason_of(req: &ProvisioningRequest, ctype: ConditionType) -> ConditionReason {
    find_condition(&req.status.conditions, ctype)
        .map(|c| c.reason)
        .unwrap_or(ConditionReason::Unknown)
}

#[tokio::test]
async fn happy_path_with_hardware() {
    let h = Harness::new();
    let req = h.submit(true).await;
    let name = req.metadata.name.clone();

    // Pass 1: NAR created, allocation pending.
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert!(req.condition_true(ConditionType::Validated));
    assert!(req.condition_true(ConditionType::HardwareTemplateRendered));
    assert_eq!(
        reason_of(&req, ConditionType::HardwareProvisioned),
        ConditionReason::InProgress
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Progressing);
    assert!(req.status.extensions.hardware_provisioning_started_at.is_some());
    let nar_ref = req.status.extensions.node_allocation_request.clone().unwrap();
    assert_eq!(nar_ref.namespace, "edge-1");
    assert!(h
        .store
        .get_node_allocation_request(&nar_ref.namespace, &nar_ref.name)
        .await
        .unwrap()
        .is_some());

    // Pass 2: plugin grants the node; cluster instance appears.
    h.allocate_node(&name, "edge-1-node-0.example.com").await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert!(req.condition_true(ConditionType::HardwareProvisioned));
    assert_eq!(req.status.extensions.allocated_node_host_map.len(), 1);
    assert_eq!(
        req.status.extensions.allocated_node_host_map.values().next().unwrap(),
        "edge-1-node-0.example.com"
    );
    let instance = h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .expect("cluster instance created");
    assert_eq!(
        instance.spec.nodes[0].bmc_address.as_deref(),
        Some("redfish://10.0.0.1/redfish/v1")
    );
    // Hardware labels wait for the install to finish.
    assert!(!instance.spec.nodes[0].labels.contains_key(HW_MGR_NODE_ID_LABEL));

    // Pass 3: installed, cluster available, one compliant enforce policy.
    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.add_root_policy("du-validator", RemediationAction::Enforce).await;
    h.add_child_policy(
        "edge-1",
        "du-validator",
        RemediationAction::Enforce,
        Some(ComplianceState::Compliant),
    )
    .await;
    let action = h.reconcile(&name).await;
    assert_eq!(action.requeue_after, None);

    let req = h.request(&name).await;
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Fulfilled);
    assert!(req.condition_true(ConditionType::ClusterInstalled));
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::Completed
    );
    assert!(req.status.extensions.non_compliant_at.is_none());
    assert_eq!(req.status.extensions.policies.len(), 1);
    assert!(req.status.extensions.policies[0].expected);

    // Post-install decoration landed.
    let instance = h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        instance.spec.nodes[0].labels.get(HARDWARE_PLUGIN_REF_LABEL).map(String::as_str),
        Some("loopback")
    );
    assert_eq!(
        instance.spec.nodes[0].labels.get(HW_MGR_NODE_ID_LABEL).map(String::as_str),
        Some("6f0e21f4-5a11-4840-9b52-0a4c11a20001")
    );
    let mc = h.store.get_managed_cluster("edge-1").await.unwrap().unwrap();
    assert_eq!(
        mc.metadata.label(TEMPLATE_ARTIFACTS_LABEL),
        Some("4c9e8f10-2f14-4b4e-9c2d-0c70a7a30a11")
    );

    // Identical observed state: a fourth pass writes an identical status.
    let before = h.request(&name).await;
    h.reconcile(&name).await;
    let after = h.request(&name).await;
    assert_eq!(before.status, after.status);
}

#[tokio::test]
async fn hardware_less_flow() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    // No hardware template: the instance is created on the first pass.
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert!(find_condition(&req.status.conditions, ConditionType::HardwareProvisioned).is_none());
    assert!(req.status.extensions.node_allocation_request.is_none());
    assert!(h
        .store
        .get_node_allocation_request("edge-1", &name)
        .await
        .unwrap()
        .is_none());

    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.reconcile(&name).await;

    let req = h.request(&name).await;
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Fulfilled);

    let instance = h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .unwrap();
    assert!(instance.spec.nodes[0].bmc_address.is_none());
    assert!(!instance.spec.nodes[0].labels.contains_key(HARDWARE_PLUGIN_REF_LABEL));

    let mc = h.store.get_managed_cluster("edge-1").await.unwrap().unwrap();
    assert_eq!(
        mc.metadata.label(TEMPLATE_ARTIFACTS_LABEL),
        Some("4c9e8f10-2f14-4b4e-9c2d-0c70a7a30a11")
    );
}

#[tokio::test]
async fn expected_enforce_policy_missing_then_times_out() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.add_root_policy("du-validator", RemediationAction::Enforce).await;

    let action = h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::InProgress
    );
    assert_eq!(
        find_condition(&req.status.conditions, ConditionType::ConfigurationApplied)
            .unwrap()
            .message,
        "Expected configuration is not yet prepared"
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Progressing);
    assert!(req.status.extensions.non_compliant_at.is_some());
    assert!(action.requeue_after.is_some());

    // The budget elapses with the policy still unreplicated.
    h.backdate_non_compliant_at(&name, 21).await;
    let action = h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::TimedOut
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Failed);
    assert_eq!(action.requeue_after, None);
}

#[tokio::test]
async fn cluster_not_ready_preserves_the_timer() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.add_root_policy("du-validator", RemediationAction::Enforce).await;
    h.add_child_policy(
        "edge-1",
        "du-validator",
        RemediationAction::Enforce,
        Some(ComplianceState::NonCompliant),
    )
    .await;

    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::InProgress
    );
    let t0 = req.status.extensions.non_compliant_at.expect("timer running");

    // The cluster goes dark; the timer must not advance or clear.
    h.set_cluster_available("edge-1", false).await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::ClusterNotReady
    );
    assert_eq!(req.status.extensions.non_compliant_at, Some(t0));
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Progressing);

    // Back online: same timer, back to applying.
    h.set_cluster_available("edge-1", true).await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::InProgress
    );
    assert_eq!(req.status.extensions.non_compliant_at, Some(t0));
}

#[tokio::test]
async fn inform_only_never_times_out() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.add_root_policy("du-validator", RemediationAction::Inform).await;
    h.add_child_policy(
        "edge-1",
        "du-validator",
        RemediationAction::Inform,
        Some(ComplianceState::NonCompliant),
    )
    .await;

    // Sweeps far apart in wall-clock terms are simulated by repeated passes;
    // with no timer running there is nothing to expire.
    for _ in 0..3 {
        let action = h.reconcile(&name).await;
        let req = h.request(&name).await;
        assert_eq!(
            reason_of(&req, ConditionType::ConfigurationApplied),
            ConditionReason::OutOfDate
        );
        assert!(req.status.extensions.non_compliant_at.is_none());
        assert_eq!(action.requeue_after, None, "inform drift does not requeue");
    }
}

#[tokio::test]
async fn timed_out_configuration_recovers_to_completed() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.finish_install("edge-1").await;
    h.set_cluster_available("edge-1", true).await;
    h.add_root_policy("du-validator", RemediationAction::Enforce).await;
    h.add_child_policy(
        "edge-1",
        "du-validator",
        RemediationAction::Enforce,
        Some(ComplianceState::Pending),
    )
    .await;

    h.reconcile(&name).await;
    h.backdate_non_compliant_at(&name, 30).await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::TimedOut
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Failed);

    // The propagator eventually remediates everything.
    h.add_child_policy(
        "edge-1",
        "du-validator",
        RemediationAction::Enforce,
        Some(ComplianceState::Compliant),
    )
    .await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::ConfigurationApplied),
        ConditionReason::Completed
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Fulfilled);
    assert!(req.status.extensions.non_compliant_at.is_none());
}

#[tokio::test]
async fn finalization_deletes_children_before_releasing() {
    let h = Harness::new();
    let req = h.submit(true).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.allocate_node(&name, "edge-1-node-0.example.com").await;
    h.reconcile(&name).await;
    assert!(h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .is_some());

    h.store.mark_provisioning_request_deleted(&name).await.unwrap();
    h.reconcile(&name).await;

    assert!(h.store.get_provisioning_request(&name).await.unwrap().is_none());
    assert!(h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .is_none());
    assert!(h
        .store
        .get_node_allocation_request("edge-1", &name)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn external_spec_drift_is_repaired() {
    let h = Harness::new();
    let req = h.submit(false).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    let mut instance = h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .unwrap();
    let desired_release = instance.spec.release.clone();
    instance.spec.release = "4.2.0".into();
    h.store.upsert_cluster_instance(&instance).await.unwrap();

    h.reconcile(&name).await;
    let instance = h
        .store
        .get_cluster_instance("edge-1", "edge-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.spec.release, desired_release);
}

#[tokio::test]
async fn plugin_outage_backs_off_without_failing() {
    let h = Harness::new();
    let req = h.submit(true).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;
    h.loopback.set_unavailable(true);

    let action = h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_ne!(req.status.provisioning.phase, ProvisioningPhase::Failed);
    assert_eq!(req.status.extensions.hardware_plugin_attempts, 1);
    assert_eq!(
        action.requeue_after,
        Some(std::time::Duration::from_secs(15))
    );

    // Second consecutive failure widens the interval.
    let action = h.reconcile(&name).await;
    assert_eq!(
        action.requeue_after,
        Some(std::time::Duration::from_secs(30))
    );

    // Recovery resets the ladder.
    h.loopback.set_unavailable(false);
    h.allocate_node(&name, "edge-1-node-0.example.com").await;
    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert!(req.condition_true(ConditionType::HardwareProvisioned));
    assert_eq!(req.status.extensions.hardware_plugin_attempts, 0);
}

#[tokio::test]
async fn hardware_timeout_is_terminal_but_keeps_the_nar() {
    let h = Harness::new();
    let req = h.submit(true).await;
    let name = req.metadata.name.clone();

    h.reconcile(&name).await;

    // Rewind the hardware timer past the 60m budget.
    let mut req = h.request(&name).await;
    let started = req
        .status
        .extensions
        .hardware_provisioning_started_at
        .unwrap();
    req.status.extensions.hardware_provisioning_started_at =
        Some(started - Duration::minutes(61));
    h.store.upsert_provisioning_request(&req).await.unwrap();

    h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(
        reason_of(&req, ConditionType::HardwareProvisioned),
        ConditionReason::TimedOut
    );
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Failed);
    // Kept for inspection.
    assert!(h
        .store
        .get_node_allocation_request("edge-1", &name)
        .await
        .unwrap()
        .is_some());

    // The verdict does not flap on later passes.
    h.reconcile(&name).await;
    let after = h.request(&name).await;
    assert_eq!(after.status.provisioning.phase, ProvisioningPhase::Failed);
}

#[tokio::test]
async fn input_errors_do_not_requeue() {
    let h = Harness::new();
    seed_template(h.store.as_ref(), false).await;
    let mut request = template_request("edge-1");
    request.spec.template_parameters["unexpected"] = serde_json::json!(true);
    let request = h.store.upsert_provisioning_request(&request).await.unwrap();
    let name = request.metadata.name.clone();

    let action = h.reconcile(&name).await;
    let req = h.request(&name).await;
    assert_eq!(req.status.provisioning.phase, ProvisioningPhase::Failed);
    assert_eq!(
        reason_of(&req, ConditionType::Validated),
        ConditionReason::Failed
    );
    assert_eq!(action.requeue_after, None);
}
