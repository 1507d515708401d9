use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use o2ims_domain::{
    BareMetalHost, ClusterInstance, ClusterTemplate, ConfigMap, ManagedCluster,
    NodeAllocationRequest, Policy, ProvisioningRequest,
};
use o2ims_store::{StateStore, StoreError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One YAML document from a seed directory, discriminated by its `kind` key.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    ProvisioningRequest(ProvisioningRequest),
    ClusterTemplate(ClusterTemplate),
    ConfigMap(ConfigMap),
    NodeAllocationRequest(NodeAllocationRequest),
    ClusterInstance(ClusterInstance),
    ManagedCluster(ManagedCluster),
    Policy(Policy),
    BareMetalHost(BareMetalHost),
}

/// Walk `dir` and parse every document in every `.yml`/`.yaml` file.
pub fn load_manifests(dir: &Path) -> Result<Vec<Manifest>, SeedError> {
    let mut manifests = Vec::new();
    collect(dir, &mut manifests)?;
    Ok(manifests)
}

fn collect(dir: &Path, out: &mut Vec<Manifest>) -> Result<(), SeedError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SeedError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| SeedError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out)?;
            continue;
        }
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == "yml" || e == "yaml");
        if !is_yaml {
            continue;
        }

        let content = std::fs::read_to_string(&path).map_err(|e| SeedError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        for document in serde_yaml::Deserializer::from_str(&content) {
            let manifest = Manifest::deserialize(document).map_err(|e| SeedError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?;
            out.push(manifest);
        }
        debug!(path = %path.display(), "loaded seed file");
    }
    Ok(())
}

/// Write every manifest into the store. Returns the number of objects
/// written.
pub async fn seed_store(
    store: &dyn StateStore,
    manifests: Vec<Manifest>,
) -> Result<usize, SeedError> {
    let count = manifests.len();
    for manifest in manifests {
        match manifest {
            Manifest::ProvisioningRequest(o) => {
                store.upsert_provisioning_request(&o).await?;
            }
            Manifest::ClusterTemplate(o) => {
                store.upsert_cluster_template(&o).await?;
            }
            Manifest::ConfigMap(o) => {
                store.upsert_config_map(&o).await?;
            }
            Manifest::NodeAllocationRequest(o) => {
                store.upsert_node_allocation_request(&o).await?;
            }
            Manifest::ClusterInstance(o) => {
                store.upsert_cluster_instance(&o).await?;
            }
            Manifest::ManagedCluster(o) => {
                store.upsert_managed_cluster(&o).await?;
            }
            Manifest::Policy(o) => {
                store.upsert_policy(&o).await?;
            }
            Manifest::BareMetalHost(o) => {
                store.upsert_bare_metal_host(&o).await?;
            }
        }
    }
    Ok(count)
}
