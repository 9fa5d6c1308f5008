// ABOUTME: CloudProvider trait and provisioning data types
// ABOUTME: Defines the abstract interface for the external stack provisioning service

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Bundle, Region};

/// Ports opened on every sandbox instance
pub const DEFAULT_OPEN_PORTS: &[u16] = &[22, 80, 443];

/// Label attached to every provisioned stack so provider-side resources can
/// be traced back to their record
pub const STACK_ID_LABEL: &str = "sandstack.stack.id";

/// Opaque provider-side identifier for a provisioned stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle(pub String);

impl From<String> for ProviderHandle {
    fn from(id: String) -> Self {
        ProviderHandle(id)
    }
}

impl From<&str> for ProviderHandle {
    fn from(id: &str) -> Self {
        ProviderHandle(id.to_string())
    }
}

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the provider needs to create one sandbox stack
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub region: Region,
    pub stack_name: String,
    pub instance_name: String,
    pub bundle: Bundle,
    /// Inbound ports opened on the instance
    pub open_ports: Vec<u16>,
    /// Provider-side labels for resource tracing
    pub labels: HashMap<String, String>,
}

impl ProvisionSpec {
    pub fn new(
        region: Region,
        stack_name: impl Into<String>,
        instance_name: impl Into<String>,
        bundle: Bundle,
    ) -> Self {
        Self {
            region,
            stack_name: stack_name.into(),
            instance_name: instance_name.into(),
            bundle,
            open_ports: DEFAULT_OPEN_PORTS.to_vec(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of provider-side stack readiness
#[derive(Debug, Clone)]
pub struct StackProbe {
    /// True once the stack and its instance are fully provisioned
    pub ready: bool,
    /// Provider status text, if any
    pub detail: Option<String>,
}

/// Abstract interface over the external provisioning service.
///
/// Implementations report failures as `GatewayError::Transient` when a retry
/// could succeed and `GatewayError::Permanent` otherwise; `delete` on a
/// missing resource reports `GatewayError::NotFound`.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short provider identifier used in logs
    fn provider_name(&self) -> &'static str;

    /// Create a stack and return its provider-side handle
    async fn create(&self, spec: &ProvisionSpec) -> Result<ProviderHandle>;

    /// Probe a stack's provisioning status
    async fn describe(&self, handle: &ProviderHandle) -> Result<StackProbe>;

    /// Tear down a stack and its resources
    async fn delete(&self, handle: &ProviderHandle) -> Result<()>;

    /// Publish a message to a notification topic
    async fn publish(&self, topic: &str, message: &str) -> Result<()>;
}
