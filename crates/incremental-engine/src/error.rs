use query_path::QueryPath;
use serde::{Deserialize, Serialize};

/// An error raised by a field resolver or a batch load function.
///
/// Resolver errors never abort execution: the failing field becomes `null`
/// and the error is recorded against the field's path, scoped either to the
/// main response or to the deferred payload the field belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub message: String,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts this into an error reportable in a response, attached to the
    /// path of the field that raised it.
    pub fn into_server_error(self, path: QueryPath) -> ServerError {
        ServerError::new(self.message, path)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// An error as it appears in a response or an incremental payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
    #[serde(default, skip_serializing_if = "QueryPath::is_empty")]
    pub path: QueryPath,
}

impl ServerError {
    pub fn new(message: impl Into<String>, path: QueryPath) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}

/// The signal raised when a non-null field resolves to null and error
/// propagation is enabled.
///
/// The violation itself has already been recorded by the validator when this
/// is raised. Callers discard the value under construction and re-check one
/// level up, so the null is promoted to the nearest nullable ancestor. No new
/// errors are recorded while the signal travels.
#[derive(Debug, Clone, thiserror::Error)]
#[error("a non-nullable field at `{path}` of type `{type_name}` resolved to null")]
pub struct NonNullFieldWasNull {
    pub path: QueryPath,
    pub type_name: String,
}

/// A failure inside dispatch bookkeeping.
///
/// These are isolated: the pipeline logs them and carries on, they never
/// reach field results.
#[derive(Debug, Clone, thiserror::Error)]
#[error("batch dispatch coordination failed: {message}")]
pub struct CoordinatorError {
    pub message: String,
}

impl CoordinatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
