use axum::http::StatusCode;
use codefleet_scheduler::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a handler for service {0} is already registered")]
    HandlerAlreadyRegistered(&'static str),

    #[error("service {0} is not registered")]
    NotRegistered(String),

    #[error("service {service} has no method {method}")]
    UnknownMethod { service: String, method: String },

    #[error("service {0} has no handler on this node")]
    NotAvailable(&'static str),

    /// An error reply from the code node, passed through as received.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Core(#[from] codefleet_core::Error),
}

impl ServiceError {
    /// HTTP status this error is reported with, locally and over the wire.
    pub fn status(&self) -> StatusCode {
        use codefleet_core::Error as Core;
        match self {
            ServiceError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ServiceError::NotRegistered(_) | ServiceError::UnknownMethod { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotAvailable(_) | ServiceError::HandlerAlreadyRegistered(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Transport(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Queue(QueueError::DuplicateActiveJob { .. }) => StatusCode::CONFLICT,
            ServiceError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Queue(QueueError::QueueClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Core(Core::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Core(Core::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Core(Core::Conflict(_)) => StatusCode::CONFLICT,
            ServiceError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
