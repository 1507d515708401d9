use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "o2ims",
    about = "ProvisioningRequest control plane for O2IMS cluster provisioning",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane until interrupted.
    Start {
        /// Directory of YAML manifests loaded into the in-memory store.
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Hardware plugin endpoint as name=url[,token=FILE]. Repeatable.
        #[arg(long = "plugin")]
        plugins: Vec<String>,

        /// Register the loopback hardware plugin.
        #[arg(long)]
        loopback: bool,
    },

    /// Validate every template and request in the seed directory.
    Validate {
        /// Directory of YAML manifests.
        seed: PathBuf,
    },

    /// Print the rendered inputs for one request.
    Render {
        /// Directory of YAML manifests.
        seed: PathBuf,

        /// Name of the provisioning request to render.
        #[arg(long)]
        request: String,
    },

    /// Reconcile each request once and print status summaries.
    Status {
        /// Directory of YAML manifests.
        seed: PathBuf,

        /// Limit output to one request.
        #[arg(long)]
        request: Option<String>,
    },
}
