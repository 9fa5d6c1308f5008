// ABOUTME: Caller-facing operation surface consumed by the UI/CLI layer
// ABOUTME: Wraps orchestrator results in a structured success/error envelope

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StackError;
use crate::orchestrator::LifecycleOrchestrator;
use crate::types::{DeployRequest, StackRecord};

/// Machine-readable error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable error code, e.g. "conflict" or "not_found"
    pub error: String,
    /// Human-readable description
    pub message: String,
}

/// Generic response wrapper: either `data` or `error` is set, never both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(err: &StackError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                error: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::err(&err),
        }
    }
}

/// Acknowledgment for an accepted deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAccepted {
    pub stack_id: String,
}

/// Acknowledgment for an accepted delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAccepted {
    pub accepted: bool,
}

/// Thin façade over the orchestrator for presentation layers.
///
/// Every method returns an `ApiResponse`; errors never cross this boundary
/// as panics or raw `Err` values.
#[derive(Clone)]
pub struct StackService {
    orchestrator: LifecycleOrchestrator,
}

impl StackService {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn deploy(&self, request: DeployRequest) -> ApiResponse<DeployAccepted> {
        self.orchestrator
            .deploy(request)
            .await
            .map(|stack_id| DeployAccepted { stack_id })
            .into()
    }

    pub async fn delete(&self, stack_id: &str) -> ApiResponse<DeleteAccepted> {
        self.orchestrator
            .delete(stack_id)
            .await
            .map(|accepted| DeleteAccepted { accepted })
            .into()
    }

    pub async fn status(&self, stack_id: &str) -> ApiResponse<StackRecord> {
        self.orchestrator.status(stack_id).await.into()
    }

    pub async fn list(&self) -> ApiResponse<Vec<StackRecord>> {
        self.orchestrator.list().await.into()
    }

    pub async fn wait_clean(&self, stack_id: &str, timeout: Duration) -> ApiResponse<StackRecord> {
        self.orchestrator.wait_clean(stack_id, timeout).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_data_on_success() {
        let response = ApiResponse::ok(DeployAccepted {
            stack_id: "stk_1".to_string(),
        });
        assert!(response.is_success());
        assert_eq!(response.data.unwrap().stack_id, "stk_1");
        assert!(response.error.is_none());
    }

    #[test]
    fn envelope_carries_code_and_message_on_error() {
        let err = StackError::Conflict("demo".to_string());
        let response: ApiResponse<DeployAccepted> = ApiResponse::err(&err);

        assert!(!response.is_success());
        assert!(response.data.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.error, "conflict");
        assert!(error.message.contains("demo"));
    }

    #[test]
    fn envelope_serializes_without_empty_fields() {
        let err = StackError::NotFound("stk_missing".to_string());
        let response: ApiResponse<StackRecord> = ApiResponse::err(&err);
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"not_found\""));
    }
}
