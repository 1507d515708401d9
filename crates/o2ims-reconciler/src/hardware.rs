use chrono::Utc;
use tracing::{info, warn};

use o2ims_domain::{
    set_condition, ConditionReason, ConditionStatus, ConditionType, NodeAllocationRequest,
    NodeAllocationRequestRef, NodeAllocationRequestSpec, ObjectMeta, ProvisioningPhase,
    ProvisioningRequest, OWNER_LABEL, TEMPLATE_ARTIFACTS_LABEL,
};
use o2ims_hwplugin::{retry_interval, AllocationPhase, PluginError};
use o2ims_template::{HardwareLayout, ResolvedRequest};

use crate::context::Context;
use crate::error::ReconcileError;
use crate::outcome::Action;
use crate::phase::set_phase;

/// One allocated node with its bare-metal record resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedNodeDetail {
    pub node_id: String,
    pub hostname: String,
    pub bmh_name: String,
    pub bmh_namespace: String,
    pub bmc_address: Option<String>,
    pub boot_mac_address: Option<String>,
}

/// Result of one pass over the hardware stage.
pub enum HardwareOutcome {
    /// All nodes allocated and resolved; installation may proceed.
    Ready(Vec<AllocatedNodeDetail>),
    /// Allocation still converging; conditions updated, requeue as told.
    Waiting(Action),
    /// Terminal failure; phase already set, stop the pipeline.
    Fatal,
}

/// Drive the NodeAllocationRequest for one request and observe the plugin.
///
/// Idempotent: creates the NAR when absent, repairs its spec on template
/// drift, and re-derives the allocated-node view on every pass. The NAR is
/// deliberately kept around on timeout for operator inspection.
pub async fn ensure(
    ctx: &Context,
    req: &mut ProvisioningRequest,
    resolved: &ResolvedRequest,
    layout: &HardwareLayout,
) -> Result<HardwareOutcome, ReconcileError> {
    let desired_spec = NodeAllocationRequestSpec {
        hardware_plugin_ref: layout.hardware_plugin_ref.clone(),
        node_groups: layout.node_groups.clone(),
    };
    if let Err(e) = desired_spec.validate() {
        return Ok(fatal_hardware(
            req,
            ConditionType::HardwareTemplateRendered,
            e.to_string(),
        ));
    }
    set_condition(
        &mut req.status.conditions,
        ConditionType::HardwareTemplateRendered,
        ConditionStatus::True,
        ConditionReason::Completed,
        "node allocation request rendered",
    );

    let namespace = resolved.cluster_name.clone();
    let name = req.metadata.name.clone();

    let nar = match ctx
        .store
        .get_node_allocation_request(&namespace, &name)
        .await?
    {
        None => {
            let mut metadata = ObjectMeta::namespaced(&namespace, &name);
            metadata
                .labels
                .insert(OWNER_LABEL.to_string(), req.metadata.name.clone());
            let nar = NodeAllocationRequest {
                metadata,
                spec: desired_spec.clone(),
                status: Default::default(),
            };
            let stored = ctx.store.upsert_node_allocation_request(&nar).await?;
            info!(request = %name, %namespace, "created node allocation request");
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
                            "ownership conflict: node allocation request '{}/{}' is owned by '{}'",
                            namespace,
                            name,
                            owner.unwrap_or("<nobody>")
                        ),
                    );
                    return Ok(HardwareOutcome::Fatal);
                }
            }
            if existing.spec != desired_spec {
                existing.spec = desired_spec.clone();
                existing = ctx.store.upsert_node_allocation_request(&existing).await?;
                info!(request = %name, "repaired node allocation request spec");
            }
            existing
        }
    };

    if req.status.extensions.node_allocation_request.is_none() {
        req.status.extensions.node_allocation_request = Some(NodeAllocationRequestRef {
            name: name.clone(),
            namespace: namespace.clone(),
            hardware_plugin_ref: layout.hardware_plugin_ref.clone(),
        });
    }
    let started = *req
        .status
        .extensions
        .hardware_provisioning_started_at
        .get_or_insert_with(Utc::now);
    let provisioned_before = req.condition_true(ConditionType::HardwareProvisioned);
    let timed_out = !provisioned_before
        && Utc::now() - started > req.spec.timeouts.hardware_provisioning();

    let plugin = match ctx.plugins.for_ref(&layout.hardware_plugin_ref) {
        Ok(plugin) => plugin,
        Err(e) => {
            return Ok(fatal_hardware(
                req,
                ConditionType::HardwareProvisioned,
                e.to_string(),
            ))
        }
    };

    let status = match plugin.query_allocation(&name).await {
        Ok(status) => {
            req.status.extensions.hardware_plugin_attempts = 0;
            status
        }
        Err(e) if e.is_transient() => {
            if timed_out {
                return Ok(hardware_timeout(req, started));
            }
            let attempt = req.status.extensions.hardware_plugin_attempts;
            req.status.extensions.hardware_plugin_attempts = attempt.saturating_add(1);
            warn!(request = %name, error = %e, attempt, "hardware plugin unavailable");
            set_phase(
                req,
                ProvisioningPhase::Progressing,
                "hardware plugin unavailable; retrying",
            );
            return Ok(HardwareOutcome::Waiting(Action::requeue_after(
                retry_interval(attempt),
            )));
        }
        Err(PluginError::UnknownAllocation(_)) => {
            if timed_out {
                return Ok(hardware_timeout(req, started));
            }
            set_condition(
                &mut req.status.conditions,
                ConditionType::HardwareProvisioned,
                ConditionStatus::False,
                ConditionReason::InProgress,
                "allocation not yet acknowledged by the hardware plugin",
            );
            set_phase(req, ProvisioningPhase::Progressing, "waiting for hardware allocation");
            return Ok(HardwareOutcome::Waiting(Action::requeue_medium()));
        }
        Err(e) => {
            return Ok(fatal_hardware(
                req,
                ConditionType::HardwareProvisioned,
                e.to_string(),
            ))
        }
    };

    match status.phase {
        AllocationPhase::InProgress => {
            if timed_out {
                return Ok(hardware_timeout(req, started));
            }
            set_condition(
                &mut req.status.conditions,
                ConditionType::HardwareProvisioned,
                ConditionStatus::False,
                ConditionReason::InProgress,
                if status.message.is_empty() {
                    "hardware provisioning in progress".to_string()
                } else {
                    status.message
                },
            );
            set_phase(req, ProvisioningPhase::Progressing, "hardware provisioning in progress");
            Ok(HardwareOutcome::Waiting(Action::requeue_medium()))
        }
        AllocationPhase::Failed => Ok(fatal_hardware(
            req,
            ConditionType::HardwareProvisioned,
            status.message,
        )),
        AllocationPhase::Provisioned => {
            let nodes = match plugin.query_allocated_nodes(&name).await {
                Ok(nodes) => nodes,
                Err(e) if e.is_transient() => {
                    let attempt = req.status.extensions.hardware_plugin_attempts;
                    req.status.extensions.hardware_plugin_attempts = attempt.saturating_add(1);
                    warn!(request = %name, error = %e, "allocated-node query failed");
                    set_phase(
                        req,
                        ProvisioningPhase::Progressing,
                        "hardware plugin unavailable; retrying",
                    );
                    return Ok(HardwareOutcome::Waiting(Action::requeue_after(
                        retry_interval(attempt),
                    )));
                }
                Err(e) => {
                    return Ok(fatal_hardware(
                        req,
                        ConditionType::HardwareProvisioned,
                        e.to_string(),
                    ))
                }
            };

            let mut details = Vec::with_capacity(nodes.len());
            let mut host_map = std::collections::BTreeMap::new();
            for node in &nodes {
                if host_map
                    .insert(node.id.clone(), node.hostname.clone())
                    .is_some()
                {
                    return Ok(fatal_hardware(
                        req,
                        ConditionType::HardwareProvisioned,
                        format!("plugin reported node id '{}' twice", node.id),
                    ));
                }
                let Some(bmh) = ctx
                    .store
                    .get_bare_metal_host(&node.bmh_namespace, &node.bmh_name)
                    .await?
                else {
                    set_condition(
                        &mut req.status.conditions,
                        ConditionType::HardwareProvisioned,
                        ConditionStatus::False,
                        ConditionReason::InProgress,
                        format!(
                            "waiting for bare-metal host record '{}/{}'",
                            node.bmh_namespace, node.bmh_name
                        ),
                    );
                    set_phase(req, ProvisioningPhase::Progressing, "resolving allocated nodes");
                    return Ok(HardwareOutcome::Waiting(Action::requeue_medium()));
                };
                details.push(AllocatedNodeDetail {
                    node_id: node.id.clone(),
                    hostname: node.hostname.clone(),
                    bmh_name: node.bmh_name.clone(),
                    bmh_namespace: node.bmh_namespace.clone(),
                    bmc_address: Some(bmh.spec.bmc_address),
                    boot_mac_address: Some(bmh.spec.boot_mac_address),
                });
            }

            req.status.extensions.allocated_node_host_map = host_map;
            set_condition(
                &mut req.status.conditions,
                ConditionType::HardwareProvisioned,
                ConditionStatus::True,
                ConditionReason::Completed,
                "all nodes allocated",
            );
            sync_nar_status(ctx, nar, &status.node_names).await?;
            Ok(HardwareOutcome::Ready(details))
        }
    }
}

/// Mirror the plugin's verdict onto the NAR resource so its watchers see the
/// same state the HTTP API reports.
async fn sync_nar_status(
    ctx: &Context,
    mut nar: NodeAllocationRequest,
    node_names: &[String],
) -> Result<(), ReconcileError> {
    let already_current = nar.status.node_names == node_names
        && o2ims_domain::condition_is_true(&nar.status.conditions, ConditionType::Provisioned);
    if already_current {
        return Ok(());
    }
    nar.status.node_names = node_names.to_vec();
    set_condition(
        &mut nar.status.conditions,
        ConditionType::Provisioned,
        ConditionStatus::True,
        ConditionReason::Completed,
        "all nodes allocated",
    );
    ctx.store.upsert_node_allocation_request(&nar).await?;
    Ok(())
}

fn fatal_hardware(
    req: &mut ProvisioningRequest,
    ctype: ConditionType,
    message: String,
) -> HardwareOutcome {
    warn!(request = %req.metadata.name, %message, "hardware provisioning failed");
    set_condition(
        &mut req.status.conditions,
        ctype,
        ConditionStatus::False,
        ConditionReason::Failed,
        message,
    );
    set_phase(req, ProvisioningPhase::Failed, "hardware provisioning failed");
    HardwareOutcome::Fatal
}

fn hardware_timeout(
    req: &mut ProvisioningRequest,
    started: chrono::DateTime<Utc>,
) -> HardwareOutcome {
    let elapsed = Utc::now() - started;
    set_condition(
        &mut req.status.conditions,
        ConditionType::HardwareProvisioned,
        ConditionStatus::False,
        ConditionReason::TimedOut,
        format!(
            "hardware not provisioned after {}m, exceeding the {}m budget",
            elapsed.num_minutes(),
            req.spec.timeouts.hardware_provisioning().num_minutes()
        ),
    );
    set_phase(req, ProvisioningPhase::Failed, "hardware provisioning timed out");
    HardwareOutcome::Fatal
}

/// Stamp the template-artifacts label on the managed cluster once it exists.
pub async fn label_managed_cluster(
    ctx: &Context,
    resolved: &ResolvedRequest,
) -> Result<(), ReconcileError> {
    let Some(mut cluster) = ctx.store.get_managed_cluster(&resolved.cluster_name).await? else {
        return Ok(());
    };
    let value = resolved.template_id.to_string();
    if cluster.metadata.label(TEMPLATE_ARTIFACTS_LABEL) != Some(value.as_str()) {
        cluster
            .metadata
            .labels
            .insert(TEMPLATE_ARTIFACTS_LABEL.to_string(), value);
        ctx.store.upsert_managed_cluster(&cluster).await?;
    }
    Ok(())
}
