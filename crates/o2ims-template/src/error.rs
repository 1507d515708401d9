use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cluster template '{0}' not found")]
    TemplateNotFound(String),

    #[error("cluster template '{key}' exists in more than one namespace")]
    AmbiguousTemplate { key: String },

    #[error("cluster template '{0}' has not passed validation yet")]
    TemplateNotValidated(String),

    #[error("cluster template '{0}' is validated but carries no template id")]
    TemplateIdMissing(String),

    #[error("cluster template metadata name '{actual}' does not match '{expected}'")]
    MetadataNameMismatch { actual: String, expected: String },

    #[error("cluster template '{key}' collides with a template in namespace '{namespace}'")]
    DuplicateTemplate { key: String, namespace: String },

    #[error("template parameter schema is invalid: {0}")]
    InvalidParameterSchema(String),

    #[error("config map '{namespace}/{name}' not found")]
    ConfigMapMissing { namespace: String, name: String },

    #[error("config map '{name}' has no '{key}' entry")]
    ConfigMapKeyMissing { name: String, key: String },

    #[error("config map '{name}' data does not decode: {message}")]
    DataDecode { name: String, message: String },

    #[error("template parameters rejected: {0}")]
    Schema(#[from] o2ims_schema::SchemaError),

    #[error("rendered cluster input names no clusterName")]
    MissingClusterName,

    #[error("cluster input node {index} is invalid: {message}")]
    InvalidNodeEntry { index: usize, message: String },

    #[error("store error: {0}")]
    Store(#[from] o2ims_store::StoreError),
}

impl TemplateError {
    /// Transient failures requeue; everything else is an input error surfaced
    /// on the request status until the spec changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TemplateError::TemplateNotValidated(_) | TemplateError::Store(_)
        )
    }
}
