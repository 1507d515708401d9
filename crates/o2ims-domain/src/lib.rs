pub mod error;
pub mod meta;
pub mod types;

pub use error::DomainError;
pub use meta::{
    condition_is_true, find_condition, set_condition, Condition, ConditionReason,
    ConditionStatus, ConditionType, ObjectMeta,
};
pub use types::*;
