//! Error types for the Tally sync engine.

use crate::OperationType;
use thiserror::Error;

/// Classified failure of a remote store call.
///
/// The executor returns these unchanged; the coordinator and the fallback
/// router decide what each class means for the operation or save at hand.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network unavailable: {0}")]
    Network(String),

    #[error("remote call timed out after {0} ms")]
    Timeout(u64),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Whether the failure says the remote already holds this data.
    ///
    /// Matches the typed conflict variant as well as duplicate-key and
    /// unique-constraint signatures carried in a rejection message.
    pub fn is_duplicate(&self) -> bool {
        match self {
            RemoteError::Conflict(_) => true,
            RemoteError::Rejected { status: 409, .. } => true,
            RemoteError::Rejected { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("duplicate key")
                    || message.contains("unique constraint")
                    || message.contains("409")
            }
            _ => false,
        }
    }

    /// Whether a later attempt may succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout(_))
    }
}

/// All possible errors from the Tally engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Local storage
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Remote
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("not authenticated")]
    NotAuthenticated,

    // Validation
    #[error("operation {op_type} is missing its correlation key '{field}'")]
    MissingCorrelationKey {
        op_type: OperationType,
        field: &'static str,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Bulk restore
    #[error("import requires explicit confirmation")]
    ConfirmationRequired,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error must reach the user as a hard failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotAuthenticated | Error::Remote(RemoteError::NotAuthenticated) | Error::Storage(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
