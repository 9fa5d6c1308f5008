// ABOUTME: ProviderGateway applying retry and error classification to provider calls
// ABOUTME: All transient-failure handling for the provisioning service lives here

use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use tracing::warn;

use sandstack_config::{constants, env_override};

use crate::error::{GatewayError, Result};
use crate::provider::{CloudProvider, ProviderHandle, ProvisionSpec, StackProbe};

/// Retry budget for a single gateway operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First retry delay
    pub initial: Duration,
    /// Upper bound for a single delay
    pub cap: Duration,
    /// Total elapsed time allowed across retries
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            cap: Duration::from_secs(10),
            budget: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Build the policy from environment overrides, falling back to defaults
    pub fn from_env() -> Self {
        let initial_ms = env_override(constants::SANDSTACK_RETRY_INITIAL_MS, 1u64, 60_000, 500);
        let cap_secs = env_override(constants::SANDSTACK_RETRY_CAP_SECS, 1u64, 300, 10);
        let budget_secs = env_override(constants::SANDSTACK_RETRY_BUDGET_SECS, 1u64, 3_600, 30);
        Self {
            initial: Duration::from_millis(initial_ms),
            cap: Duration::from_secs(cap_secs),
            budget: Duration::from_secs(budget_secs),
        }
    }
}

/// Retryable façade over a `CloudProvider`.
///
/// Create, describe and delete retry transient failures with exponential
/// backoff and jitter until the policy budget runs out; permanent failures
/// surface immediately. Delete treats an already-removed resource as
/// success so the termination path stays idempotent. Publish is a single
/// attempt — the notification dispatcher owns its own quick retry.
pub struct ProviderGateway {
    provider: Arc<dyn CloudProvider>,
    policy: RetryPolicy,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self::with_policy(provider, RetryPolicy::from_env())
    }

    pub fn with_policy(provider: Arc<dyn CloudProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub async fn create(&self, spec: &ProvisionSpec) -> Result<ProviderHandle> {
        self.with_retry("create", || self.provider.create(spec)).await
    }

    pub async fn describe(&self, handle: &ProviderHandle) -> Result<StackProbe> {
        self.with_retry("describe", || self.provider.describe(handle))
            .await
    }

    pub async fn delete(&self, handle: &ProviderHandle) -> Result<()> {
        self.with_retry("delete", || async {
            match self.provider.delete(handle).await {
                // Already gone: the resource we wanted removed is removed
                Err(GatewayError::NotFound(_)) => Ok(()),
                other => other,
            }
        })
        .await
    }

    pub async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        self.provider.publish(topic, message).await
    }

    /// Apply retry logic to a provider operation
    async fn with_retry<F, T, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoff {
            initial_interval: self.policy.initial,
            max_interval: self.policy.cap,
            max_elapsed_time: Some(self.policy.budget),
            ..ExponentialBackoff::default()
        };

        retry(backoff, || async {
            match operation().await {
                Ok(value) => Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(
                        "transient {} failure on provider {}, retrying: {}",
                        label,
                        self.provider.provider_name(),
                        err
                    );
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
    }
}
