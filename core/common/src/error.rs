//! Common error types for drivemigrate.

use thiserror::Error;

/// Top-level error type for drivemigrate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport session expired or the connection dropped mid-call.
    ///
    /// Recoverable by reconnecting; see `SessionStore`.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Credentials could not be obtained or refreshed.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The remote store refused access to an item.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other error reported by the remote API.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },

    /// Response could not be read or decoded.
    #[error("Network error: {0}")]
    Network(String),

    /// A remote item lacks a field the engine relies on.
    #[error("Item {id} is missing field '{field}'")]
    MissingField {
        /// Item the field is missing from.
        id: String,
        /// Name of the missing wire field.
        field: &'static str,
    },

    /// Remote data contradicts an assumption of the engine.
    #[error("Inconsistent data: {0}")]
    Consistency(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An error raised while processing the item at `path`.
    #[error("Failed at '{path}': {source}")]
    AtPath {
        /// Relative path of the offending item.
        path: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the relative path of the item being processed.
    pub fn at_path(self, path: impl Into<String>) -> Self {
        Error::AtPath {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through `AtPath` wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::AtPath { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when reconnecting and retrying may succeed.
    pub fn is_session_expired(&self) -> bool {
        matches!(self.root_cause(), Error::SessionExpired(_))
    }

    /// True for access refusals on a specific item.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.root_cause(), Error::PermissionDenied(_))
    }

    /// True when the item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
