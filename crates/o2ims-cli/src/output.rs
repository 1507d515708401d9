use o2ims_domain::{Condition, ConditionStatus, ProvisioningRequest};

/// Render one request's status as human-readable text.
pub fn render_request(req: &ProvisioningRequest) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}  {}  {}\n",
        req.metadata.name, req.status.provisioning.phase, req.status.provisioning.detail
    ));
    if let Some(cluster) = &req.status.extensions.cluster_name {
        out.push_str(&format!("  cluster: {}\n", cluster));
    }
    for condition in &req.status.conditions {
        out.push_str(&render_condition(condition));
    }
    if !req.status.extensions.allocated_node_host_map.is_empty() {
        out.push_str("  allocated nodes:\n");
        for (id, hostname) in &req.status.extensions.allocated_node_host_map {
            out.push_str(&format!("    {} -> {}\n", id, hostname));
        }
    }
    for policy in &req.status.extensions.policies {
        let compliance = policy
            .compliance
            .map(|c| format!("{c:?}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  policy {}/{} ({}) {}\n",
            policy.policy_namespace, policy.policy_name, policy.remediation_action, compliance
        ));
    }
    out
}

fn render_condition(condition: &Condition) -> String {
    let marker = match condition.status {
        ConditionStatus::True => "x",
        ConditionStatus::False => " ",
        ConditionStatus::Unknown => "?",
    };
    format!(
        "  [{}] {:<26} {:<16} {}\n",
        marker, condition.ctype, condition.reason, condition.message
    )
}

/// Render one validation finding.
pub fn render_finding(subject: &str, result: &Result<(), String>) -> String {
    match result {
        Ok(()) => format!("ok    {}\n", subject),
        Err(message) => format!("fail  {}: {}\n", subject, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2ims_domain::{
        set_condition, ConditionReason, ConditionType, ObjectMeta, ProvisioningRequestSpec,
        ProvisioningRequestStatus, Timeouts,
    };

    #[test]
    fn renders_phase_and_conditions() {
        let mut req = ProvisioningRequest {
            metadata: ObjectMeta::named("123e4567-e89b-42d3-a456-426614174000"),
            spec: ProvisioningRequestSpec {
                template_name: "sno".into(),
                template_version: "v1".into(),
                template_parameters: serde_json::Value::Null,
                timeouts: Timeouts::default(),
            },
            status: ProvisioningRequestStatus::default(),
        };
        set_condition(
            &mut req.status.conditions,
            ConditionType::Validated,
            o2ims_domain::ConditionStatus::True,
            ConditionReason::Completed,
            "validated",
        );

        let text = render_request(&req);
        assert!(text.contains("123e4567-e89b-42d3-a456-426614174000"));
        assert!(text.contains("[x] Validated"));
    }
}
