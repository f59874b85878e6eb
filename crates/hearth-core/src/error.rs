//! Core error type for the hearth server.
//!
//! `ServerError` is used throughout the domain (dispatch, pipeline, config).
//! Every variant maps onto one entry of the closed wire vocabulary via
//! [`ServerError::kind`]; the encoder never emits a kind outside this set.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServerError {
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Bad command: {0}")]
    BadCommand(String),

    #[error("Server stopping: {0}")]
    Stopping(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ServerError {
    /// The fixed wire identifier for this error, as emitted in the
    /// `error_kind` field of an error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::NotInitialized(_) => "not_initialized",
            ServerError::AlreadyInitialized(_) => "already_initialized",
            ServerError::BadCommand(_) => "bad_command",
            ServerError::Stopping(_) => "stopping",
            ServerError::NotFound(_) => "not_found",
            ServerError::MethodNotAllowed(_) => "method_not_allowed",
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Busy(_) => "busy",
            ServerError::Internal(_) => "internal_error",
            ServerError::Cancelled(_) => "cancelled",
        }
    }

    /// Status code for `init`, which has no envelope channel: 0 is reserved
    /// for success, each failure class gets a stable non-zero code.
    pub fn init_status(&self) -> i32 {
        match self {
            ServerError::BadCommand(_) => 1,
            ServerError::AlreadyInitialized(_) => 2,
            _ => 3,
        }
    }
}
