use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use o2ims_domain::{
    set_condition, ztp_namespace, ComplianceState, ConditionReason, ConditionStatus,
    ConditionType, Policy, PolicyObservation, ProvisioningPhase, ProvisioningRequest,
    RemediationAction,
};
use o2ims_template::ResolvedRequest;

use crate::context::Context;
use crate::error::ReconcileError;
use crate::outcome::Action;
use crate::phase::set_phase;

/// Configuration state derived from one sweep over the bound policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationPhase {
    ClusterNotReady,
    Missing,
    Preparing,
    Applying,
    OutOfDate,
    Completed,
    TimedOut,
}

/// What one reconcile observed about the policy landscape, before timers.
#[derive(Debug, Clone)]
pub struct PolicySweep {
    /// Some expected root policy has no child bound to this cluster.
    pub expected_missing: bool,
    /// Every expected root policy is inform.
    pub all_expected_inform: bool,
    pub observations: Vec<PolicyObservation>,
}

/// The ordered derivation over a sweep, cluster availability already checked.
pub fn classify(sweep: &PolicySweep) -> ConfigurationPhase {
    if sweep.expected_missing {
        if sweep.all_expected_inform {
            return ConfigurationPhase::Missing;
        }
        return ConfigurationPhase::Preparing;
    }

    let enforce_unsatisfied = sweep.observations.iter().any(|o| {
        o.remediation_action == RemediationAction::Enforce
            && o.compliance != Some(ComplianceState::Compliant)
    });
    if enforce_unsatisfied {
        return ConfigurationPhase::Applying;
    }

    let all_compliant = sweep
        .observations
        .iter()
        .all(|o| o.compliance == Some(ComplianceState::Compliant));
    if all_compliant {
        return ConfigurationPhase::Completed;
    }

    // Remaining non-compliance is inform-only.
    ConfigurationPhase::OutOfDate
}

/// Overlay the single configuration timer on a classified sweep.
///
/// The timer starts on the first Preparing/Applying observation, survives
/// TimedOut so the verdict is stable, and is cleared whenever the sweep lands
/// on Completed, Missing, or OutOfDate. ClusterNotReady never reaches this
/// function; the timer is preserved untouched there.
pub fn apply_timer(
    tentative: ConfigurationPhase,
    non_compliant_at: &mut Option<DateTime<Utc>>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> ConfigurationPhase {
    match tentative {
        ConfigurationPhase::Preparing | ConfigurationPhase::Applying => {
            let since = *non_compliant_at.get_or_insert(now);
            if now - since > timeout {
                ConfigurationPhase::TimedOut
            } else {
                tentative
            }
        }
        ConfigurationPhase::Completed
        | ConfigurationPhase::Missing
        | ConfigurationPhase::OutOfDate => {
            *non_compliant_at = None;
            tentative
        }
        other => other,
    }
}

/// Observe the policies bound to the installed cluster and fold the result
/// into the request's ConfigurationApplied condition and aggregate phase.
pub async fn supervise(
    ctx: &Context,
    req: &mut ProvisioningRequest,
    resolved: &ResolvedRequest,
) -> Result<Action, ReconcileError> {
    let cluster = resolved.cluster_name.as_str();

    let available = ctx
        .store
        .get_managed_cluster(cluster)
        .await?
        .map_or(false, |mc| mc.is_available());
    if !available {
        // Timer untouched: unavailability must not eat into the budget.
        set_condition(
            &mut req.status.conditions,
            ConditionType::ConfigurationApplied,
            ConditionStatus::False,
            ConditionReason::ClusterNotReady,
            "managed cluster is not available",
        );
        set_phase(
            req,
            ProvisioningPhase::Progressing,
            "waiting for the managed cluster to become available",
        );
        return Ok(Action::requeue_medium());
    }

    let roots: Vec<Policy> = ctx
        .store
        .list_policies(&ztp_namespace(&resolved.template_namespace))
        .await?
        .into_iter()
        .filter(|p| p.expects_template(&resolved.template_key))
        .collect();
    let children: Vec<Policy> = ctx
        .store
        .list_policies(cluster)
        .await?
        .into_iter()
        .filter(|p| p.bound_cluster() == Some(cluster))
        .collect();

    let expected_missing = roots
        .iter()
        .any(|root| !children.iter().any(|c| c.metadata.name == root.child_name()));
    let all_expected_inform = roots
        .iter()
        .all(|r| r.spec.remediation_action == RemediationAction::Inform);

    let mut observations: Vec<PolicyObservation> = children
        .iter()
        .map(|c| PolicyObservation {
            policy_name: c.metadata.name.clone(),
            policy_namespace: c.metadata.namespace.clone(),
            remediation_action: c.spec.remediation_action,
            compliance: c.status.compliance,
            expected: roots.iter().any(|r| r.child_name() == c.metadata.name),
        })
        .collect();
    observations.sort_by(|a, b| a.policy_name.cmp(&b.policy_name));
    req.status.extensions.policies = observations.clone();

    let sweep = PolicySweep { expected_missing, all_expected_inform, observations };
    let tentative = classify(&sweep);
    let now = Utc::now();
    let phase = apply_timer(
        tentative,
        &mut req.status.extensions.non_compliant_at,
        req.spec.timeouts.cluster_configuration(),
        now,
    );
    debug!(request = %req.metadata.name, cluster, ?phase, "policy sweep");

    match phase {
        ConfigurationPhase::Completed => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::True,
                ConditionReason::Completed,
                "the configuration is up to date",
            );
            set_phase(req, ProvisioningPhase::Fulfilled, "provisioning request fulfilled");
            Ok(Action::done())
        }
        ConfigurationPhase::Missing => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::False,
                ConditionReason::Missing,
                "expected policies have not been propagated yet",
            );
            set_phase(req, ProvisioningPhase::Progressing, "waiting for policy propagation");
            Ok(Action::done())
        }
        ConfigurationPhase::Preparing => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::False,
                ConditionReason::InProgress,
                "Expected configuration is not yet prepared",
            );
            set_phase(req, ProvisioningPhase::Progressing, "preparing cluster configuration");
            Ok(Action::requeue_medium())
        }
        ConfigurationPhase::Applying => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::False,
                ConditionReason::InProgress,
                "the configuration is still being applied",
            );
            set_phase(req, ProvisioningPhase::Progressing, "applying cluster configuration");
            Ok(Action::requeue_medium())
        }
        ConfigurationPhase::OutOfDate => {
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::False,
                ConditionReason::OutOfDate,
                "inform policies report non-compliance; the configuration is out of date",
            );
            set_phase(req, ProvisioningPhase::Progressing, "configuration out of date");
            Ok(Action::done())
        }
        ConfigurationPhase::TimedOut => {
            let since = req
                .status
                .extensions
                .non_compliant_at
                .unwrap_or(now);
            set_condition(
                &mut req.status.conditions,
                ConditionType::ConfigurationApplied,
                ConditionStatus::False,
                ConditionReason::TimedOut,
                format!(
                    "configuration unsatisfied for {}m, exceeding the {}m budget",
                    (now - since).num_minutes(),
                    req.spec.timeouts.cluster_configuration().num_minutes()
                ),
            );
            set_phase(req, ProvisioningPhase::Failed, "cluster configuration timed out");
            Ok(Action::done())
        }
        ConfigurationPhase::ClusterNotReady => unreachable!("handled before classification"),
    }
}
