//! Queue service error types and formatting

use serde::Serialize;
use thiserror::Error;

/// Stable service error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    QueueAlreadyExists,
    QueueNotFound,
    MessageNotFound,
    PopReceiptMismatch,
    AuthorizationFailure,
    InvalidArgument,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            Self::QueueNotFound => "QueueNotFound",
            Self::MessageNotFound => "MessageNotFound",
            Self::PopReceiptMismatch => "PopReceiptMismatch",
            Self::AuthorizationFailure => "AuthorizationFailure",
            Self::InvalidArgument => "InvalidArgument",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pop receipt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptFailure {
    /// No live message carries the given id
    UnknownMessage,
    /// The message exists but was checked out or updated since
    Mismatch,
}

/// Errors returned by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("The specified queue already exists: {0}")]
    QueueAlreadyExists(String),

    #[error("The specified queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("Invalid pop receipt for message {message_id}")]
    InvalidReceipt {
        message_id: String,
        reason: ReceiptFailure,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueueError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueAlreadyExists(_) => ErrorCode::QueueAlreadyExists,
            Self::QueueNotFound(_) => ErrorCode::QueueNotFound,
            Self::InvalidReceipt {
                reason: ReceiptFailure::UnknownMessage,
                ..
            } => ErrorCode::MessageNotFound,
            Self::InvalidReceipt {
                reason: ReceiptFailure::Mismatch,
                ..
            } => ErrorCode::PopReceiptMismatch,
            Self::AccessDenied(_) => ErrorCode::AuthorizationFailure,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }
}

/// Service-style error report, tagged with the request that produced it
#[derive(Debug)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn from_error(error: &QueueError) -> Self {
        Self::new(error.code(), error.to_string())
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Format as a JSON error document
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            code: &'static str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            resource: Option<&'a str>,
            request_id: &'a str,
        }

        let error = JsonError {
            code: self.code.as_str(),
            message: &self.message,
            resource: self.resource.as_deref(),
            request_id: &self.request_id,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }
}
