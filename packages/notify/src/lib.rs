// ABOUTME: Lifecycle event notifications for Sandstack
// ABOUTME: Publishes stack transition events to a configured topic, best-effort

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use sandstack_config::{constants, env_override};
use sandstack_gateway::{ProviderGateway, Region};

/// Kind of lifecycle transition being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackEventKind {
    Created,
    Active,
    Expired,
    Deleted,
    Failed,
}

impl StackEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

/// One lifecycle transition event, serialized as JSON onto the topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackEvent {
    #[serde(rename = "type")]
    pub kind: StackEventKind,
    pub stack_id: String,
    pub name: String,
    pub region: Region,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StackEvent {
    pub fn new(
        kind: StackEventKind,
        stack_id: impl Into<String>,
        name: impl Into<String>,
        region: Region,
    ) -> Self {
        Self {
            kind,
            stack_id: stack_id.into(),
            name: name.into(),
            region,
            occurred_at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Fire-and-forget publisher for lifecycle events.
///
/// A publish never blocks the orchestrator and never surfaces an error: the
/// message gets at most one quick retry, after which it is logged and
/// dropped. The orchestrator's correctness never depends on delivery.
pub struct NotificationDispatcher {
    gateway: Arc<ProviderGateway>,
    retry_delay: Duration,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        let retry_ms = env_override(constants::SANDSTACK_NOTIFY_RETRY_DELAY_MS, 1u64, 10_000, 250);
        Self {
            gateway,
            retry_delay: Duration::from_millis(retry_ms),
        }
    }

    /// Publish an event to the stack's topic, if one is configured
    pub fn publish(&self, topic: Option<&str>, event: StackEvent) {
        let Some(topic) = topic else { return };
        let topic = topic.to_string();
        let gateway = Arc::clone(&self.gateway);
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            let message = match serde_json::to_string(&event) {
                Ok(message) => message,
                Err(err) => {
                    warn!("failed to serialize {} event for stack {}: {}", event.kind.as_str(), event.stack_id, err);
                    return;
                }
            };

            if gateway.publish(&topic, &message).await.is_ok() {
                return;
            }

            tokio::time::sleep(retry_delay).await;
            if let Err(err) = gateway.publish(&topic, &message).await {
                warn!(
                    "dropping {} notification for stack {} after retry: {}",
                    event.kind.as_str(),
                    event.stack_id,
                    err
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sandstack_gateway::{
        CloudProvider, GatewayError, ProviderHandle, ProvisionSpec, RetryPolicy, StackProbe,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingTopic {
        publishes: Mutex<Vec<(String, String)>>,
        failures_before_success: AtomicU32,
    }

    impl RecordingTopic {
        fn new(failures_before_success: u32) -> Self {
            Self {
                publishes: Mutex::new(Vec::new()),
                failures_before_success: AtomicU32::new(failures_before_success),
            }
        }
    }

    #[async_trait]
    impl CloudProvider for RecordingTopic {
        fn provider_name(&self) -> &'static str {
            "recording"
        }

        async fn create(&self, _spec: &ProvisionSpec) -> sandstack_gateway::Result<ProviderHandle> {
            Err(GatewayError::permanent("not under test"))
        }

        async fn describe(&self, _handle: &ProviderHandle) -> sandstack_gateway::Result<StackProbe> {
            Err(GatewayError::permanent("not under test"))
        }

        async fn delete(&self, _handle: &ProviderHandle) -> sandstack_gateway::Result<()> {
            Err(GatewayError::permanent("not under test"))
        }

        async fn publish(&self, topic: &str, message: &str) -> sandstack_gateway::Result<()> {
            if self
                .failures_before_success
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GatewayError::transient("topic unavailable"));
            }
            self.publishes
                .lock()
                .unwrap()
                .push((topic.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn dispatcher(provider: Arc<RecordingTopic>) -> NotificationDispatcher {
        let gateway = Arc::new(ProviderGateway::with_policy(
            provider,
            RetryPolicy {
                initial: Duration::from_millis(1),
                cap: Duration::from_millis(5),
                budget: Duration::from_millis(50),
            },
        ));
        NotificationDispatcher {
            gateway,
            retry_delay: Duration::from_millis(5),
        }
    }

    async fn wait_for_publishes(provider: &RecordingTopic, expected: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            {
                let published = provider.publishes.lock().unwrap();
                if published.len() >= expected {
                    return published.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        provider.publishes.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn publish_delivers_event_json() {
        let provider = Arc::new(RecordingTopic::new(0));
        let dispatcher = dispatcher(provider.clone());

        let event = StackEvent::new(StackEventKind::Expired, "stk_1", "demo", Region::UsEast1);
        dispatcher.publish(Some("arn:topic:lifecycle"), event);

        let published = wait_for_publishes(&provider, 1).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "arn:topic:lifecycle");
        assert!(published[0].1.contains("\"type\":\"expired\""));
        assert!(published[0].1.contains("\"stack_id\":\"stk_1\""));
    }

    #[tokio::test]
    async fn publish_retries_once_then_succeeds() {
        let provider = Arc::new(RecordingTopic::new(1));
        let dispatcher = dispatcher(provider.clone());

        let event = StackEvent::new(StackEventKind::Created, "stk_2", "demo", Region::UsEast1);
        dispatcher.publish(Some("arn:topic:lifecycle"), event);

        let published = wait_for_publishes(&provider, 1).await;
        assert_eq!(published.len(), 1);
    }

    #[tokio::test]
    async fn publish_without_topic_is_a_no_op() {
        let provider = Arc::new(RecordingTopic::new(0));
        let dispatcher = dispatcher(provider.clone());

        let event = StackEvent::new(StackEventKind::Deleted, "stk_3", "demo", Region::UsEast1);
        dispatcher.publish(None, event);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(provider.publishes.lock().unwrap().is_empty());
    }
}
