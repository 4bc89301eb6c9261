//! Error types for the request processor

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for request processor operations
#[derive(Debug, Error)]
pub enum RpError {
    /// Malformed call (missing session, unrecognized datastore, bad value)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Address string does not follow the location identifier grammar
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// Root step namespace does not match any loaded module
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A step does not resolve against the schema, breaks the namespace
    /// rules or carries the wrong key predicates
    #[error("Bad element: {0}")]
    BadElement(String),

    /// A list instance lacks a declared key leaf
    #[error("Incomplete key: {0}")]
    IncompleteKey(String),

    /// Session table is full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Session is being torn down or still has requests in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// Addressed data node does not exist in the datastore
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Schema description is inconsistent
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpError {
    /// Code carried by an error response for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RpError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RpError::MalformedAddress(_) => ErrorCode::MalformedAddress,
            RpError::UnknownModel(_) => ErrorCode::UnknownModel,
            RpError::BadElement(_) => ErrorCode::BadElement,
            RpError::IncompleteKey(_) => ErrorCode::IncompleteKey,
            RpError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            RpError::Busy(_) => ErrorCode::Busy,
            RpError::NotFound(_) => ErrorCode::NotFound,
            RpError::InvalidSchema(_)
            | RpError::InvalidConfig(_)
            | RpError::Io(_)
            | RpError::Json(_) => ErrorCode::Internal,
        }
    }
}

/// Result codes carried in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    #[default]
    Ok,
    InvalidArgument,
    MalformedAddress,
    UnknownModel,
    BadElement,
    IncompleteKey,
    ResourceExhausted,
    Busy,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        self == ErrorCode::Ok
    }
}

/// Result type alias for request processor operations
pub type Result<T> = std::result::Result<T, RpError>;
