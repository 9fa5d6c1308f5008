// ABOUTME: Error types for provider gateway operations
// ABOUTME: Classifies provider failures into transient (retryable) and permanent

use thiserror::Error;

/// Errors surfaced by `CloudProvider` implementations and the gateway.
///
/// `Transient` covers timeouts, throttling and 5xx-equivalent signals and is
/// retried by the gateway up to its budget. `Permanent` covers invalid
/// configuration, quota exhaustion and the like and surfaces immediately.
/// `NotFound` lets the delete path treat an already-removed resource as
/// success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Retryable failure (timeout, throttling, 5xx-equivalent)
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable failure (bad configuration, quota exceeded)
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// The referenced provider resource does not exist
    #[error("provider resource not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The provider's message without the classification prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) | Self::NotFound(message) => message,
        }
    }
}

/// Type alias for Results that return GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;
