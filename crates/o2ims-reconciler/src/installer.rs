use chrono::Utc;
use tracing::{info, warn};

use o2ims_domain::{
    find_condition, set_condition, ClusterInstance, ClusterInstanceSpec, ConditionReason,
    ConditionStatus, ConditionType, HostEntry, ObjectMeta, ProvisioningPhase,
    ProvisioningRequest, HARDWARE_PLUGIN_REF_LABEL, HW_MGR_NODE_ID_LABEL, OWNER_LABEL,
};
use o2ims_template::{canonical_hash, ResolvedRequest};

use crate::context::Context;
use crate::error::ReconcileError;
use crate::hardware::AllocatedNodeDetail;
use crate::outcome::Action;
use crate::phase::set_phase;

/// Result of one pass over the install stage.
pub enum InstallOutcome {
    Installed,
    Waiting(Action),
    Fatal,
}

enum Render {
    Ready(ClusterInstanceSpec),
    /// An allocated-node dependency is not satisfied yet. Transient.
    Waiting(String),
    Fatal(String),
}

/// Project the rendered input and the allocated nodes into the installer
/// spec. Allocated nodes are matched to host entries by case-insensitive
/// hostname; hardware labels are added only after installation completes.
fn desired_spec(
    resolved: &ResolvedRequest,
    allocated: Option<&[AllocatedNodeDetail]>,
    with_hardware_labels: bool,
) -> Render {
    if let Some(allocated) = allocated {
        if allocated.len() < resolved.nodes.len() {
            return Render::Fatal(format!(
                "insufficient allocated nodes: {} allocated, {} required",
                allocated.len(),
                resolved.nodes.len()
            ));
        }
    }

    let mut nodes = Vec::with_capacity(resolved.nodes.len());
    for input in &resolved.nodes {
        let mut entry = HostEntry {
            hostname: input.hostname.clone(),
            role: input.role.clone(),
            bmc_address: None,
            boot_mac_address: None,
            node_network: input.node_network.clone(),
            labels: input.labels.clone(),
        };
        if let Some(allocated) = allocated {
            let matched: Vec<&AllocatedNodeDetail> = allocated
                .iter()
                .filter(|n| n.hostname.eq_ignore_ascii_case(&input.hostname))
                .collect();
            match matched.as_slice() {
                [] => {
                    return Render::Waiting(format!(
                        "hostname '{}' is not in the allocated host map yet",
                        input.hostname
                    ))
                }
                [node] => {
                    entry.bmc_address = node.bmc_address.clone();
                    entry.boot_mac_address = node.boot_mac_address.clone();
                    if with_hardware_labels {
                        let plugin_ref = resolved
                            .hardware
                            .as_ref()
                            .map(|h| h.hardware_plugin_ref.clone())
                            .unwrap_or_default();
                        entry
                            .labels
                            .insert(HARDWARE_PLUGIN_REF_LABEL.to_string(), plugin_ref);
                        entry
                            .labels
                            .insert(HW_MGR_NODE_ID_LABEL.to_string(), node.node_id.clone());
                    }
                }
                _ => {
                    return Render::Fatal(format!(
                        "hostname '{}' matches more than one allocated node",
                        input.hostname
                    ))
                }
            }
        }
        nodes.push(entry);
    }

    // Node entries are projected separately; keep the remaining values as-is.
    let mut values = resolved.cluster_input.clone();
    if let Some(map) = values.as_object_mut() {
        map.remove("nodes");
    }

    Render::Ready(ClusterInstanceSpec {
        cluster_name: resolved.cluster_name.clone(),
        release: resolved.release.clone(),
        values,
        nodes,
    })
}

/// Recompute and apply the ClusterInstance, then observe its progress.
///
/// The full desired spec is written on every reconcile, so external edits are
/// repaired on the next pass.
pub async fn ensure(
    ctx: &Context,
    req: &mut ProvisioningRequest,
    resolved: &ResolvedRequest,
    allocated: Option<&[AllocatedNodeDetail]>,
    with_hardware_labels: bool,
) -> Result<InstallOutcome, ReconcileError> {
    let desired = match desired_spec(resolved, allocated, with_hardware_labels) {
        Render::Ready(spec) => spec,
        Render::Waiting(message) => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ClusterInstanceRendered,
                ConditionStatus::False,
                ConditionReason::InProgress,
                message,
            );
            set_phase(req, ProvisioningPhase::Progressing, "waiting for allocated node data");
            return Ok(InstallOutcome::Waiting(Action::requeue_medium()));
        }
        Render::Fatal(message) => {
            warn!(request = %req.metadata.name, %message, "cluster instance render failed");
            set_condition(
                &mut req.status.conditions,
                ConditionType::ClusterInstanceRendered,
                ConditionStatus::False,
                ConditionReason::Failed,
                message,
            );
            set_phase(req, ProvisioningPhase::Failed, "cluster instance render failed");
            return Ok(InstallOutcome::Fatal);
        }
    };
    set_condition(
        &mut req.status.conditions,
        ConditionType::ClusterInstanceRendered,
        ConditionStatus::True,
        ConditionReason::Completed,
        "cluster instance rendered",
    );

    let namespace = resolved.cluster_name.clone();
    let instance = match ctx
        .store
        .get_cluster_instance(&namespace, &resolved.cluster_name)
        .await?
    {
        None => {
            let mut metadata = ObjectMeta::namespaced(&namespace, &resolved.cluster_name);
            metadata
                .labels
                .insert(OWNER_LABEL.to_string(), req.metadata.name.clone());
            let instance = ClusterInstance {
                metadata,
                spec: desired,
                status: Default::default(),
            };
            let stored = ctx.store.upsert_cluster_instance(&instance).await?;
            info!(request = %req.metadata.name, cluster = %resolved.cluster_name, "created cluster instance");
            stored
        }
        Some(mut existing) => {
            match existing.metadata.label(OWNER_LABEL) {
                Some(owner) if owner == req.metadata.name => {}
                owner => {
                    set_phase(
                        req,
                        ProvisioningPhase::Failed,
                        format!(
                            "ownership conflict: cluster instance '{}' is owned by '{}'",
                            resolved.cluster_name,
                            owner.unwrap_or("<nobody>")
                        ),
                    );
                    return Ok(InstallOutcome::Fatal);
                }
            }
            if existing.spec != desired {
                info!(
                    cluster = %resolved.cluster_name,
                    from = %canonical_hash(&existing.spec),
                    to = %canonical_hash(&desired),
                    "repairing cluster instance spec drift"
                );
                existing.spec = desired;
                existing = ctx.store.upsert_cluster_instance(&existing).await?;
            }
            existing
        }
    };

    match find_condition(&instance.status.conditions, ConditionType::Provisioned) {
        Some(c) if c.status.is_true() => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ClusterInstalled,
                ConditionStatus::True,
                ConditionReason::Completed,
                "cluster installed",
            );
            Ok(InstallOutcome::Installed)
        }
        observed => {
            let started = *req
                .status
                .extensions
                .cluster_provision_started_at
                .get_or_insert_with(Utc::now);

            if observed.map_or(false, |c| c.reason == ConditionReason::Failed) {
                let message = observed.map(|c| c.message.clone()).unwrap_or_default();
                set_condition(
                    &mut req.status.conditions,
                    ConditionType::ClusterInstalled,
                    ConditionStatus::False,
                    ConditionReason::Failed,
                    message,
                );
                set_phase(req, ProvisioningPhase::Failed, "cluster installation failed");
                return Ok(InstallOutcome::Fatal);
            }

            let elapsed = Utc::now() - started;
            if elapsed > req.spec.timeouts.cluster_provisioning() {
                set_condition(
                    &mut req.status.conditions,
                    ConditionType::ClusterInstalled,
                    ConditionStatus::False,
                    ConditionReason::TimedOut,
                    format!(
                        "cluster not installed after {}m, exceeding the {}m budget",
                        elapsed.num_minutes(),
                        req.spec.timeouts.cluster_provisioning().num_minutes()
                    ),
                );
                set_phase(req, ProvisioningPhase::Failed, "cluster installation timed out");
                return Ok(InstallOutcome::Fatal);
            }

            set_condition(
                &mut req.status.conditions,
                ConditionType::ClusterInstalled,
                ConditionStatus::False,
                ConditionReason::InProgress,
                "cluster installation in progress",
            );
            set_phase(req, ProvisioningPhase::Progressing, "installing cluster");
            Ok(InstallOutcome::Waiting(Action::requeue_medium()))
        }
    }
}
