pub mod error;
pub mod validate;

pub use error::SchemaError;
pub use validate::validate_and_default;
