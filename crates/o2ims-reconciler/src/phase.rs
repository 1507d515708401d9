use chrono::Utc;
use tracing::{debug, info, warn};

use o2ims_domain::{
    condition_is_true, set_condition, ConditionReason, ConditionStatus, ConditionType,
    ProvisioningPhase, ProvisioningRequest, OWNER_LABEL, PROVISIONING_FINALIZER,
};
use o2ims_store::StoreError;

use crate::context::Context;
use crate::error::ReconcileError;
use crate::hardware::{self, HardwareOutcome};
use crate::installer::{self, InstallOutcome};
use crate::outcome::Action;
use crate::policy;

const STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Update the aggregate phase summary. The update time moves only when the
/// summary actually changes, so identical reconciles write identical status.
pub(crate) fn set_phase(
    req: &mut ProvisioningRequest,
    phase: ProvisioningPhase,
    detail: impl Into<String>,
) {
    let detail = detail.into();
    let summary = &mut req.status.provisioning;
    if summary.phase != phase || summary.detail != detail {
        summary.phase = phase;
        summary.detail = detail;
        summary.update_time = Some(Utc::now());
    }
}

/// One full pass of the state machine for the named request.
///
/// Stages run in order (resolve, hardware, install, configure) and the
/// first stage that is not yet settled decides the requeue. All status
/// mutations land in a single write at the end.
pub async fn reconcile_request(ctx: &Context, name: &str) -> Result<Action, ReconcileError> {
    let Some(original) = ctx.store.get_provisioning_request(name).await? else {
        debug!(request = %name, "request gone; nothing to do");
        return Ok(Action::done());
    };
    let mut req = original.clone();

    if req.metadata.is_deleting() {
        return finalize(ctx, req).await;
    }

    if req.metadata.add_finalizer(PROVISIONING_FINALIZER) {
        req = ctx.store.upsert_provisioning_request(&req).await?;
    }

    let before = req.status.clone();
    let action = run_pipeline(ctx, &mut req).await?;
    if req.status != before {
        persist_status(ctx, &req).await?;
    }
    Ok(action)
}

async fn run_pipeline(
    ctx: &Context,
    req: &mut ProvisioningRequest,
) -> Result<Action, ReconcileError> {
    req.status.observed_generation = req.metadata.generation;

    if let Err(e) = req.validate() {
        return Ok(input_failure(req, e.to_string()));
    }

    let resolved = match o2ims_template::resolve(ctx.store.as_ref(), req).await {
        Ok(resolved) => resolved,
        Err(e) if e.is_transient() => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ClusterTemplateValidated,
                ConditionStatus::False,
                ConditionReason::InProgress,
                e.to_string(),
            );
            let phase = if req.condition_true(ConditionType::Validated) {
                ProvisioningPhase::Progressing
            } else {
                ProvisioningPhase::Pending
            };
            set_phase(req, phase, "waiting for cluster template validation");
            return Ok(Action::requeue_medium());
        }
        Err(e) => return Ok(input_failure(req, e.to_string())),
    };
    set_condition(
        &mut req.status.conditions,
        ConditionType::Validated,
        ConditionStatus::True,
        ConditionReason::Completed,
        "provisioning request validated",
    );
    set_condition(
        &mut req.status.conditions,
        ConditionType::ClusterTemplateValidated,
        ConditionStatus::True,
        ConditionReason::Completed,
        "cluster template validated",
    );
    req.status.extensions.cluster_name = Some(resolved.cluster_name.clone());

    let allocated = match &resolved.hardware {
        Some(layout) => match hardware::ensure(ctx, req, &resolved, layout).await? {
            HardwareOutcome::Ready(nodes) => Some(nodes),
            HardwareOutcome::Waiting(action) => return Ok(action),
            HardwareOutcome::Fatal => return Ok(Action::done()),
        },
        None => None,
    };

    // Hardware labels join the host entries once the installer reports done.
    let installed = req.condition_true(ConditionType::ClusterInstalled)
        || ctx
            .store
            .get_cluster_instance(&resolved.cluster_name, &resolved.cluster_name)
            .await?
            .map_or(false, |ci| {
                condition_is_true(&ci.status.conditions, ConditionType::Provisioned)
            });
    let with_hardware_labels = installed && allocated.is_some();

    match installer::ensure(ctx, req, &resolved, allocated.as_deref(), with_hardware_labels)
        .await?
    {
        InstallOutcome::Waiting(action) => return Ok(action),
        InstallOutcome::Fatal => return Ok(Action::done()),
        InstallOutcome::Installed => {}
    }

    hardware::label_managed_cluster(ctx, &resolved).await?;

    policy::supervise(ctx, req, &resolved).await
}

fn input_failure(req: &mut ProvisioningRequest, message: String) -> Action {
    warn!(request = %req.metadata.name, %message, "provisioning request input rejected");
    set_condition(
        &mut req.status.conditions,
        ConditionType::Validated,
        ConditionStatus::False,
        ConditionReason::Failed,
        message.clone(),
    );
    set_phase(req, ProvisioningPhase::Failed, message);
    // No timed requeue: nothing changes until the spec does.
    Action::done()
}

/// Delete owned children (ClusterInstance first, then the NAR), then release
/// the finalizer. Missing children count as deleted.
async fn finalize(
    ctx: &Context,
    mut req: ProvisioningRequest,
) -> Result<Action, ReconcileError> {
    if !req.metadata.has_finalizer(PROVISIONING_FINALIZER) {
        return Ok(Action::done());
    }
    info!(request = %req.metadata.name, "finalizing provisioning request");
    set_phase(&mut req, ProvisioningPhase::Deleting, "cleaning up owned resources");

    if let Some(cluster) = req.status.extensions.cluster_name.clone() {
        if let Some(instance) = ctx.store.get_cluster_instance(&cluster, &cluster).await? {
            if instance.metadata.label(OWNER_LABEL) == Some(req.metadata.name.as_str()) {
                ctx.store.delete_cluster_instance(&cluster, &cluster).await?;
            }
        }
        if let Some(nar) = ctx
            .store
            .get_node_allocation_request(&cluster, &req.metadata.name)
            .await?
        {
            if nar.metadata.label(OWNER_LABEL) == Some(req.metadata.name.as_str()) {
                ctx.store
                    .delete_node_allocation_request(&cluster, &req.metadata.name)
                    .await?;
            }
        }
    }

    req.metadata.remove_finalizer(PROVISIONING_FINALIZER);
    ctx.store.upsert_provisioning_request(&req).await?;
    Ok(Action::done())
}

/// Write the derived status once; on a conflicting write, re-read and carry
/// the derived status onto the fresh object, up to the attempt cap.
async fn persist_status(ctx: &Context, req: &ProvisioningRequest) -> Result<(), ReconcileError> {
    let mut current = req.clone();
    let mut attempts = 0;
    loop {
        match ctx.store.upsert_provisioning_request(&current).await {
            Ok(_) => return Ok(()),
            Err(e @ StoreError::Conflict { .. }) => {
                attempts += 1;
                if attempts >= STATUS_WRITE_ATTEMPTS {
                    return Err(e.into());
                }
                debug!(request = %req.metadata.name, attempts, "status write conflict; retrying");
                let Some(mut fresh) =
                    ctx.store.get_provisioning_request(&req.metadata.name).await?
                else {
                    return Ok(());
                };
                fresh.status = req.status.clone();
                current = fresh;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
