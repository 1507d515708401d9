pub mod error;
pub mod http;
pub mod loopback;
pub mod plugin;
pub mod registry;

pub use error::{retry_interval, PluginError};
pub use http::HttpHardwarePlugin;
pub use loopback::{LoopbackPlugin, LOOPBACK_PLUGIN};
pub use plugin::{AllocatedNode, AllocationPhase, AllocationStatus, HardwarePlugin};
pub use registry::PluginRegistry;
