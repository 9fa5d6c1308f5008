// ABOUTME: Error types for stack lifecycle operations
// ABOUTME: Maps validation, conflict, lookup, provider and storage failures to one taxonomy

use thiserror::Error;

use sandstack_gateway::GatewayError;

use crate::store::StoreError;

/// Main error type for stack lifecycle operations
#[derive(Error, Debug)]
pub enum StackError {
    /// Bad configuration, rejected before any provider call
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The stack name is held by a live stack
    #[error("stack name already in use: {0}")]
    Conflict(String),

    /// Unknown stack id
    #[error("stack not found: {0}")]
    NotFound(String),

    /// An operation exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Provider gateway failure
    #[error("provider error: {0}")]
    Gateway(#[from] GatewayError),

    /// Storage failure
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl StackError {
    /// Stable machine-readable code for the caller-facing surface
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Gateway(_) => "provider_error",
            Self::Store(_) => "storage_error",
        }
    }
}

impl From<StoreError> for StackError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => StackError::NotFound(id),
            StoreError::NameTaken(name) => StackError::Conflict(name),
            other => StackError::Store(other),
        }
    }
}

/// Type alias for Results that return StackError
pub type Result<T> = std::result::Result<T, StackError>;
