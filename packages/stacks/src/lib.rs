// ABOUTME: Stack lifecycle orchestration for Sandstack
// ABOUTME: Drives ephemeral sandbox stacks from deploy through auto-termination and cleanup

pub mod api;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod types;
mod watchdog;

// Re-export commonly used types
pub use api::{ApiError, ApiResponse, DeleteAccepted, DeployAccepted, StackService};
pub use error::{Result, StackError};
pub use orchestrator::{poll_delay, LifecycleOrchestrator, OrchestratorConfig};
pub use store::{StackStore, StoreError};
pub use types::{DeployRequest, StackPhase, StackRecord, DEFAULT_TTL_SECONDS};
