use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::info;

use o2ims_hwplugin::{HttpHardwarePlugin, LoopbackPlugin, PluginRegistry, LOOPBACK_PLUGIN};
use o2ims_reconciler::{reconcile_request, Context, ReconcileManager};
use o2ims_store::{InMemoryStore, StateStore};
use o2ims_template::{resolve, revalidate};

use crate::loader::{load_manifests, seed_store};
use crate::output;

async fn seeded_store(dir: &Path) -> Result<Arc<InMemoryStore>> {
    let store = Arc::new(InMemoryStore::new());
    let manifests = load_manifests(dir)
        .with_context(|| format!("loading seed directory {}", dir.display()))?;
    let written = seed_store(store.as_ref(), manifests).await?;
    info!(objects = written, "seeded store");
    Ok(store)
}

async fn revalidate_templates(store: &InMemoryStore) -> Result<()> {
    for template in store.list_cluster_templates().await? {
        revalidate(store, &template.metadata.namespace, &template.metadata.name).await?;
    }
    Ok(())
}

fn build_registry(plugins: &[String], loopback: bool) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    if loopback {
        registry.register(LOOPBACK_PLUGIN, Arc::new(LoopbackPlugin::new()));
    }
    for spec in plugins {
        let (name, rest) = spec
            .split_once('=')
            .with_context(|| format!("--plugin '{}' is not name=url[,token=FILE]", spec))?;
        let (url, token) = match rest.split_once(',') {
            None => (rest, None),
            Some((url, option)) => {
                let path = option
                    .strip_prefix("token=")
                    .with_context(|| format!("--plugin '{}' has an unknown option", spec))?;
                let token = std::fs::read_to_string(path)
                    .with_context(|| format!("reading token file {}", path))?;
                (url, Some(token.trim().to_string()))
            }
        };
        let plugin = HttpHardwarePlugin::new(name, url, token)?;
        registry.register(name, Arc::new(plugin));
        info!(plugin = name, %url, "registered hardware plugin");
    }
    Ok(registry)
}

// ── start ─────────────────────────────────────────────────────────────────────

pub async fn start(seed: Option<PathBuf>, plugins: Vec<String>, loopback: bool) -> Result<()> {
    let store = match &seed {
        Some(dir) => seeded_store(dir).await?,
        None => Arc::new(InMemoryStore::new()),
    };
    let registry = build_registry(&plugins, loopback)?;
    let ctx = Context::new(store, Arc::new(registry));
    let manager = Arc::new(ReconcileManager::new(ctx));

    tokio::select! {
        result = manager.run() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            Ok(())
        }
    }
}

// ── validate ──────────────────────────────────────────────────────────────────

pub async fn validate(seed: PathBuf) -> Result<()> {
    let store = seeded_store(&seed).await?;
    revalidate_templates(&store).await?;
    let mut failures = 0;

    for template in store.list_cluster_templates().await? {
        let result = if template.is_validated() {
            Ok(())
        } else {
            let reason = template
                .status
                .conditions
                .first()
                .map(|c| c.message.clone())
                .unwrap_or_else(|| "not validated".to_string());
            Err(reason)
        };
        if result.is_err() {
            failures += 1;
        }
        print!(
            "{}",
            output::render_finding(&format!("template {}", template.metadata.name), &result)
        );
    }

    for request in store.list_provisioning_requests().await? {
        let result = match request.validate() {
            Err(e) => Err(e.to_string()),
            Ok(()) => resolve(store.as_ref(), &request)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        };
        if result.is_err() {
            failures += 1;
        }
        print!(
            "{}",
            output::render_finding(&format!("request {}", request.metadata.name), &result)
        );
    }

    if failures > 0 {
        bail!("{failures} validation failures");
    }
    Ok(())
}

// ── render ────────────────────────────────────────────────────────────────────

pub async fn render(seed: PathBuf, request: String) -> Result<()> {
    let store = seeded_store(&seed).await?;
    revalidate_templates(&store).await?;

    let req = store
        .get_provisioning_request(&request)
        .await?
        .with_context(|| format!("request '{}' not found in seed", request))?;
    let resolved = resolve(store.as_ref(), &req).await?;

    println!("# cluster: {} (release {})", resolved.cluster_name, resolved.release);
    println!("# clusterInput");
    print!("{}", serde_yaml::to_string(&resolved.cluster_input)?);
    println!("# policyInput");
    print!("{}", serde_yaml::to_string(&resolved.policy_input)?);
    if let Some(hardware) = &resolved.hardware {
        println!("# node groups via plugin '{}'", hardware.hardware_plugin_ref);
        for group in &hardware.node_groups {
            println!(
                "#   {} role={} profile={} pool={} size={}",
                group.name, group.role, group.hardware_profile, group.resource_pool_id, group.size
            );
        }
    }
    Ok(())
}

// ── status ────────────────────────────────────────────────────────────────────

pub async fn status(seed: PathBuf, request: Option<String>) -> Result<()> {
    let store = seeded_store(&seed).await?;
    revalidate_templates(&store).await?;

    // Offline pass: hardware queries go to the loopback plugin.
    let mut registry = PluginRegistry::new();
    registry.register(LOOPBACK_PLUGIN, Arc::new(LoopbackPlugin::new()));
    let ctx = Context::new(store.clone(), Arc::new(registry));

    for req in store.list_provisioning_requests().await? {
        if let Some(name) = &request {
            if req.metadata.name != *name {
                continue;
            }
        }
        reconcile_request(&ctx, &req.metadata.name).await?;
        let updated = store
            .get_provisioning_request(&req.metadata.name)
            .await?
            .unwrap_or(req);
        print!("{}", output::render_request(&updated));
    }
    Ok(())
}
