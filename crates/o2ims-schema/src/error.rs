use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("{path}: unknown key '{key}'")]
    UnknownKey { path: String, key: String },

    #[error("{path}: missing required key '{key}'")]
    MissingRequired { path: String, key: String },

    #[error("{path}: value is not one of the permitted values")]
    NotInEnum { path: String },

    #[error("{path}: invalid schema: {message}")]
    InvalidSchema { path: String, message: String },

    #[error("{}", render_multiple(.0))]
    Multiple(Vec<SchemaError>),
}

fn render_multiple(errors: &[SchemaError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} schema violations: {}", errors.len(), lines.join("; "))
}
