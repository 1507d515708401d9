use o2ims_domain::{ClusterTemplate, ZTP_NAMESPACE_PREFIX};
use o2ims_store::{ObjectKind, StateStore, StoreError, StoreEvent};

/// Map one store event to the provisioning requests it must wake.
///
/// Delivery is at-least-once and reconciles are idempotent, so mapping errs
/// on the side of waking too many requests rather than too few.
pub async fn map_event(
    store: &dyn StateStore,
    event: &StoreEvent,
) -> Result<Vec<String>, StoreError> {
    match event.kind {
        // Spec edits and deletions reconcile the request itself; its own
        // status writes do not.
        ObjectKind::ProvisioningRequest => {
            if event.spec_changed || event.deleted {
                Ok(vec![event.name.clone()])
            } else {
                Ok(vec![])
            }
        }

        // Any template flip wakes every request referencing it.
        ObjectKind::ClusterTemplate => {
            if !(event.spec_changed || event.status_changed || event.deleted) {
                return Ok(vec![]);
            }
            requests_for_template_keys(store, &[event.name.clone()]).await
        }

        // A data edit wakes requests whose template references the map.
        ObjectKind::ConfigMap => {
            if !event.spec_changed {
                return Ok(vec![]);
            }
            let keys: Vec<String> = store
                .list_cluster_templates()
                .await?
                .into_iter()
                .filter(|t| {
                    t.metadata.namespace == event.namespace && references_map(t, &event.name)
                })
                .map(|t| t.metadata.name)
                .collect();
            if keys.is_empty() {
                return Ok(vec![]);
            }
            requests_for_template_keys(store, &keys).await
        }

        ObjectKind::NodeAllocationRequest => {
            if !(event.status_changed || event.deleted) {
                return Ok(vec![]);
            }
            // NARs are named after their owning request, in the cluster
            // namespace.
            Ok(store
                .list_provisioning_requests()
                .await?
                .into_iter()
                .filter(|r| {
                    r.metadata.name == event.name
                        && r.status.extensions.cluster_name.as_deref()
                            == Some(event.namespace.as_str())
                })
                .map(|r| r.metadata.name)
                .collect())
        }

        ObjectKind::ClusterInstance => {
            if !(event.status_changed || event.deleted) {
                return Ok(vec![]);
            }
            requests_for_cluster(store, &event.name).await
        }

        ObjectKind::ManagedCluster => {
            if !event.status_changed {
                return Ok(vec![]);
            }
            requests_for_cluster(store, &event.name).await
        }

        ObjectKind::Policy => {
            // Root policies live in ztp-<template-namespace>; everything else
            // is a child policy in a cluster namespace.
            if let Some(template_namespace) =
                event.namespace.strip_prefix(ZTP_NAMESPACE_PREFIX)
            {
                let keys: Vec<String> = store
                    .list_cluster_templates()
                    .await?
                    .into_iter()
                    .filter(|t| t.metadata.namespace == template_namespace)
                    .map(|t| t.metadata.name)
                    .collect();
                requests_for_template_keys(store, &keys).await
            } else {
                requests_for_cluster(store, &event.namespace).await
            }
        }

        // Coordinator passes poll for bare-metal records on their own
        // interval.
        ObjectKind::BareMetalHost => Ok(vec![]),
    }
}

fn references_map(template: &ClusterTemplate, name: &str) -> bool {
    template.spec.templates.cluster_instance_defaults == name
        || template.spec.templates.policy_template_defaults == name
        || template.spec.templates.hardware_template.as_deref() == Some(name)
}

async fn requests_for_template_keys(
    store: &dyn StateStore,
    keys: &[String],
) -> Result<Vec<String>, StoreError> {
    Ok(store
        .list_provisioning_requests()
        .await?
        .into_iter()
        .filter(|r| keys.iter().any(|k| *k == r.spec.template_key()))
        .map(|r| r.metadata.name)
        .collect())
}

async fn requests_for_cluster(
    store: &dyn StateStore,
    cluster: &str,
) -> Result<Vec<String>, StoreError> {
    Ok(store
        .list_provisioning_requests()
        .await?
        .into_iter()
        .filter(|r| r.status.extensions.cluster_name.as_deref() == Some(cluster))
        .map(|r| r.metadata.name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2ims_store::InMemoryStore;
    use o2ims_template::testing::{seed_template, template_request, TEMPLATE_NAMESPACE};

    fn event(kind: ObjectKind, namespace: &str, name: &str, status_changed: bool) -> StoreEvent {
        StoreEvent {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            spec_changed: !status_changed,
            status_changed,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn template_events_wake_referencing_requests() {
        let store = InMemoryStore::new();
        seed_template(&store, false).await;
        let request = template_request("edge-1");
        let request = store.upsert_provisioning_request(&request).await.unwrap();

        let keys = map_event(
            &store,
            &event(ObjectKind::ClusterTemplate, TEMPLATE_NAMESPACE, "sno.v1", true),
        )
        .await
        .unwrap();
        assert_eq!(keys, vec![request.metadata.name.clone()]);

        // A different template wakes nothing.
        let keys = map_event(
            &store,
            &event(ObjectKind::ClusterTemplate, TEMPLATE_NAMESPACE, "sno.v2", true),
        )
        .await
        .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn config_map_events_route_through_the_template() {
        let store = InMemoryStore::new();
        seed_template(&store, false).await;
        let request = store
            .upsert_provisioning_request(&template_request("edge-1"))
            .await
            .unwrap();

        let keys = map_event(
            &store,
            &event(
                ObjectKind::ConfigMap,
                TEMPLATE_NAMESPACE,
                "sno-install-defaults",
                false,
            ),
        )
        .await
        .unwrap();
        assert_eq!(keys, vec![request.metadata.name]);

        let keys = map_event(
            &store,
            &event(ObjectKind::ConfigMap, TEMPLATE_NAMESPACE, "unrelated", false),
        )
        .await
        .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn cluster_scoped_events_match_by_rendered_name() {
        let store = InMemoryStore::new();
        seed_template(&store, false).await;
        let mut request = template_request("edge-1");
        request.status.extensions.cluster_name = Some("edge-1".to_string());
        let request = store.upsert_provisioning_request(&request).await.unwrap();

        for kind in [ObjectKind::ManagedCluster, ObjectKind::ClusterInstance] {
            let keys = map_event(&store, &event(kind, "edge-1", "edge-1", true))
                .await
                .unwrap();
            assert_eq!(keys, vec![request.metadata.name.clone()], "{kind}");
        }

        // Child policy events route by namespace.
        let keys = map_event(
            &store,
            &event(ObjectKind::Policy, "edge-1", "ztp-x.du-validator", true),
        )
        .await
        .unwrap();
        assert_eq!(keys, vec![request.metadata.name.clone()]);

        // Root policy events route through the template namespace.
        let keys = map_event(
            &store,
            &event(
                ObjectKind::Policy,
                &format!("ztp-{TEMPLATE_NAMESPACE}"),
                "du-validator",
                true,
            ),
        )
        .await
        .unwrap();
        assert_eq!(keys, vec![request.metadata.name]);
    }

    #[tokio::test]
    async fn request_status_writes_do_not_self_trigger() {
        let store = InMemoryStore::new();
        let keys = map_event(
            &store,
            &event(ObjectKind::ProvisioningRequest, "", "some-request", true),
        )
        .await
        .unwrap();
        assert!(keys.is_empty());
    }
}
