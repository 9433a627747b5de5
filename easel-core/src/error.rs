use thiserror::Error;

/// Failure to interpret a stored or remote document.
///
/// Most field-level problems never surface here; they are defaulted.
/// Only documents that cannot be routed to a kind at all are rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unknown element kind: {0}")]
    UnknownKind(String),

    #[error("Document is not an object")]
    NotAnObject,

    #[error("Document is missing the `type` field")]
    MissingKind,

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e.to_string())
    }
}
