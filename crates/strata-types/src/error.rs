use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid version id {input:?}: {reason}")]
    InvalidVersionId { input: String, reason: String },

    #[error("job id must not be empty")]
    EmptyJobId,

    #[error("payload must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}
