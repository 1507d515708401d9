use thiserror::Error;

/// Unexpected failures that abort a reconcile. Everything the state machine
/// anticipates (input errors, plugin outages, timeouts) is folded into the
/// request's status conditions instead and never reaches this type.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] o2ims_store::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}
