//! Error types and JSON-RPC error codes for the service host.

use serde_json::Value;
use sqltools_batch::BatchError;

use super::message::ErrorObject;

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Service-specific error codes.
pub mod service_error_codes {
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const SESSION_NOT_FOUND: i32 = -32851;
    pub const SESSION_ALREADY_EXISTS: i32 = -32852;
    pub const BATCH_ERROR: i32 = -32853;
    pub const CONNECTION_NOT_FOUND: i32 = -32854;

    /// Code used when a handler fails without naming one.
    pub const HANDLER_DEFAULT: i32 = 0;
}

/// All errors that can occur in the service host.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("No pending request with id {0}")]
    UnknownResponseId(String),

    #[error("A handler for '{0}' is already registered")]
    HandlerAlreadyRegistered(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("No connection associated with owner URI {0}")]
    ConnectionNotFound(String),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Error reply received from the other side of the channel.
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// Failure reported by a request handler.
    #[error("{message}")]
    Handler { code: i32, message: String },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Host has stopped")]
    HostStopped,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// A handler failure with an explicit error code.
    pub fn handler(code: i32, message: impl Into<String>) -> Self {
        ServiceError::Handler {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        use error_codes::*;
        use service_error_codes::*;
        match self {
            ServiceError::ParseError(_) | ServiceError::Json(_) => PARSE_ERROR,
            ServiceError::InvalidRequest(_) => INVALID_REQUEST,
            ServiceError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ServiceError::InvalidParams(_) => INVALID_PARAMS,
            ServiceError::RequestCancelled => REQUEST_CANCELLED,
            ServiceError::SessionNotFound(_) => SESSION_NOT_FOUND,
            ServiceError::SessionAlreadyExists(_) => SESSION_ALREADY_EXISTS,
            ServiceError::ConnectionNotFound(_) => CONNECTION_NOT_FOUND,
            ServiceError::Batch(BatchError::Cancelled) => REQUEST_CANCELLED,
            ServiceError::Batch(_) => BATCH_ERROR,
            ServiceError::Remote { code, .. } | ServiceError::Handler { code, .. } => *code,
            ServiceError::InternalError(_)
            | ServiceError::UnknownResponseId(_)
            | ServiceError::HandlerAlreadyRegistered(_)
            | ServiceError::Framing(_)
            | ServiceError::HostStopped
            | ServiceError::Transport(_)
            | ServiceError::Io(_) => INTERNAL_ERROR,
        }
    }

    /// The error object sent back in a ResponseError.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            ServiceError::Remote {
                code,
                message,
                data,
            } => ErrorObject {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            _ => ErrorObject::new(self.code(), self.to_string()),
        }
    }
}

impl From<ErrorObject> for ServiceError {
    fn from(e: ErrorObject) -> Self {
        ServiceError::Remote {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<ServiceError>() {
            Ok(inner) => inner,
            Err(e) => ServiceError::handler(service_error_codes::HANDLER_DEFAULT, format!("{e:#}")),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
