pub mod context;
pub mod enqueue;
pub mod error;
pub mod hardware;
pub mod installer;
pub mod manager;
pub mod outcome;
pub mod phase;
pub mod policy;

pub use context::Context;
pub use enqueue::map_event;
pub use error::ReconcileError;
pub use manager::{ReconcileManager, WorkQueue};
pub use outcome::{Action, MEDIUM_INTERVAL, SHORT_INTERVAL};
pub use phase::reconcile_request;
pub use policy::{apply_timer, classify, ConfigurationPhase, PolicySweep};
