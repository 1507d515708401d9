use thiserror::Error;

use crate::event::ObjectKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ObjectKind, name: String },

    /// The write carried a stale resource version. Re-read and re-derive.
    #[error("conflict writing {kind} '{name}': resource version is stale")]
    Conflict { kind: ObjectKind, name: String },

    /// The ConfigMap was frozen by template validation; its data may not
    /// change anymore.
    #[error("config map '{name}' is immutable")]
    Immutable { name: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
