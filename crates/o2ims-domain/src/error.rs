use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("provisioning request name '{0}' is not a UUID")]
    InvalidRequestName(String),

    #[error("invalid template reference '{0}'")]
    InvalidTemplateReference(String),

    #[error("node allocation request has no node groups")]
    EmptyNodeGroups,

    #[error("duplicate node group '{0}'")]
    DuplicateNodeGroup(String),
}
