pub mod error;
pub mod render;
pub mod resolve;
pub mod testing;
pub mod validate;

pub use error::TemplateError;
pub use render::{canonical_hash, deep_merge};
pub use resolve::{find_template, node_inputs, resolve, HardwareLayout, NodeInput, ResolvedRequest};
pub use validate::{revalidate, validate_cluster_template};
