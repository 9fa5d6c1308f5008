// ABOUTME: Core type definitions for stack lifecycle management
// ABOUTME: Defines the stack record, lifecycle phases and the deploy request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sandstack_gateway::{Bundle, ProviderHandle, Region};

use crate::error::{Result, StackError};

/// Default stack lifetime once active, in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Longest accepted stack name
pub const MAX_STACK_NAME_LEN: usize = 255;

/// Lifecycle phase of a sandbox stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackPhase {
    /// Record created, provisioning not yet started
    Pending,
    /// Provider create issued, waiting for the stack to come up
    Provisioning,
    /// Stack is up; the termination watchdog is armed
    Active,
    /// TTL elapsed, termination about to start
    Expiring,
    /// Provider delete in progress
    Terminating,
    /// Stack and its resources are gone
    Deleted,
    /// Unrecoverable error; see last_error
    Failed,
}

impl StackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Expiring => "expiring",
            Self::Terminating => "terminating",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "provisioning" => Some(Self::Provisioning),
            "active" => Some(Self::Active),
            "expiring" => Some(Self::Expiring),
            "terminating" => Some(Self::Terminating),
            "deleted" => Some(Self::Deleted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal phases never transition again, except the sweep re-drive of a
    /// failed delete (Failed → Terminating while delete_pending is set).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }

    /// Whether the state graph allows moving from this phase to `next`
    pub fn can_transition_to(&self, next: StackPhase) -> bool {
        use StackPhase::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Pending, Terminating)
                | (Pending, Failed)
                | (Provisioning, Active)
                | (Provisioning, Terminating)
                | (Provisioning, Failed)
                | (Active, Expiring)
                | (Active, Terminating)
                | (Active, Failed)
                | (Expiring, Terminating)
                | (Expiring, Failed)
                | (Terminating, Deleted)
                | (Terminating, Failed)
                // A failed delete is re-driven until the resources are gone
                | (Failed, Terminating)
        )
    }
}

impl std::fmt::Display for StackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one sandbox stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    /// Opaque identifier, assigned at creation
    pub id: String,
    /// User-supplied stack name, unique among live stacks
    pub name: String,

    // Configuration snapshot, immutable after creation
    pub region: Region,
    pub instance_name: String,
    pub bundle: Bundle,
    pub notification_topic: Option<String>,
    pub ttl_seconds: u64,

    /// Current lifecycle phase, mutated only by the orchestrator
    pub phase: StackPhase,
    /// Provider-side handle, set once create succeeds
    pub provider_handle: Option<ProviderHandle>,
    /// Set while a delete is owed to the provider; sweep retries these
    pub delete_pending: bool,
    /// Diagnostic recorded on transition to Failed
    pub last_error: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once at the Active transition, never changed afterwards
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StackRecord {
    /// Build a fresh Pending record from a validated deploy request
    pub fn from_request(id: String, request: &DeployRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: request.stack_name.clone(),
            region: request.region,
            instance_name: request.instance_name.clone(),
            bundle: request.bundle,
            notification_topic: request.notification_topic.clone(),
            ttl_seconds: request.ttl_seconds,
            phase: StackPhase::Pending,
            provider_handle: None,
            delete_pending: false,
            last_error: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            deleted_at: None,
        }
    }
}

/// Request to deploy a new sandbox stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub region: Region,
    pub stack_name: String,
    pub instance_name: String,
    pub bundle: Bundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_topic: Option<String>,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl DeployRequest {
    /// Request with the catalog defaults; callers override what they need
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            region: Region::ApSoutheast1,
            stack_name: stack_name.into(),
            instance_name: "sandbox-env".to_string(),
            bundle: Bundle::Nano,
            notification_topic: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Validate the request before any provider call
    pub fn validate(&self) -> Result<()> {
        if self.stack_name.is_empty() {
            return Err(StackError::Validation(
                "stack_name cannot be empty".to_string(),
            ));
        }

        if self.stack_name.len() > MAX_STACK_NAME_LEN {
            return Err(StackError::Validation(format!(
                "stack_name exceeds {} characters",
                MAX_STACK_NAME_LEN
            )));
        }

        if self.instance_name.is_empty() {
            return Err(StackError::Validation(
                "instance_name cannot be empty".to_string(),
            ));
        }

        if self.ttl_seconds == 0 {
            return Err(StackError::Validation(
                "ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(topic) = &self.notification_topic {
            if topic.is_empty() {
                return Err(StackError::Validation(
                    "notification_topic cannot be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}
