// ABOUTME: Stack lifecycle orchestrator driving deploy, expiry, deletion and sweep
// ABOUTME: Owns all phase transitions; per-stack locks serialize every read-check-write

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sandstack_config::{constants, env_override};
use sandstack_gateway::{ProviderGateway, ProvisionSpec, STACK_ID_LABEL};
use sandstack_notify::{NotificationDispatcher, StackEvent, StackEventKind};

use crate::error::{Result, StackError};
use crate::store::StackStore;
use crate::types::{DeployRequest, StackPhase, StackRecord};
use crate::watchdog::{self, WatchdogHandle};

/// Tuning knobs for the orchestrator's deadlines and poll cadence
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// First provisioning poll delay
    pub poll_initial: Duration,
    /// Upper bound for a single poll delay
    pub poll_cap: Duration,
    /// Overall provisioning deadline before the stack fails
    pub provision_timeout: Duration,
    /// Age after which sweep re-drives a stack stuck in Terminating
    pub terminating_retry: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_initial: Duration::from_secs(5),
            poll_cap: Duration::from_secs(60),
            provision_timeout: Duration::from_secs(900),
            terminating_retry: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    /// Build the config from environment overrides, falling back to defaults
    pub fn from_env() -> Self {
        let poll_initial = env_override(constants::SANDSTACK_POLL_INITIAL_SECS, 1u64, 300, 5);
        let poll_cap = env_override(constants::SANDSTACK_POLL_CAP_SECS, 1u64, 3_600, 60);
        let provision_timeout =
            env_override(constants::SANDSTACK_PROVISION_TIMEOUT_SECS, 30u64, 86_400, 900);
        let terminating_retry =
            env_override(constants::SANDSTACK_TERMINATING_RETRY_SECS, 10u64, 86_400, 300);
        Self {
            poll_initial: Duration::from_secs(poll_initial),
            poll_cap: Duration::from_secs(poll_cap),
            provision_timeout: Duration::from_secs(provision_timeout),
            terminating_retry: Duration::from_secs(terminating_retry),
        }
    }
}

/// Delay before provisioning poll number `attempt`: doubles from `initial`
/// up to `cap`.
pub fn poll_delay(initial: Duration, cap: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(1u32 << attempt.min(16)).min(cap)
}

/// Drives every stack through its lifecycle.
///
/// Cheap to clone; all state lives behind one `Arc`. Operations targeting
/// the same stack id are serialized through a per-id async lock, so a
/// concurrent `status` reader always sees a fully applied transition.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    inner: Arc<OrchestratorInner>,
}

pub(crate) struct OrchestratorInner {
    store: StackStore,
    gateway: Arc<ProviderGateway>,
    dispatcher: NotificationDispatcher,
    config: OrchestratorConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    watchdogs: Mutex<HashMap<String, WatchdogHandle>>,
    /// Live provisioning tasks; the slot is filled once the task is spawned
    provisioners: Mutex<HashMap<String, Option<JoinHandle<()>>>>,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: StackStore,
        gateway: Arc<ProviderGateway>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self::with_config(store, gateway, dispatcher, OrchestratorConfig::from_env())
    }

    pub fn with_config(
        store: StackStore,
        gateway: Arc<ProviderGateway>,
        dispatcher: NotificationDispatcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                gateway,
                dispatcher,
                config,
                locks: Mutex::new(HashMap::new()),
                watchdogs: Mutex::new(HashMap::new()),
                provisioners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Accept a deploy request and start provisioning in the background.
    ///
    /// Returns the new stack id once the record is durable; progress after
    /// that is observable through `status` and notifications.
    pub async fn deploy(&self, request: DeployRequest) -> Result<String> {
        request.validate()?;

        if let Some(existing) = self.inner.store.find_live_by_name(&request.stack_name).await? {
            return Err(StackError::Conflict(format!(
                "{} (held by {})",
                request.stack_name, existing.id
            )));
        }

        let record = StackRecord::from_request(generate_stack_id(), &request, Utc::now());
        // The partial unique index turns a lost deploy race into NameTaken
        self.inner.store.insert(&record).await?;

        info!(
            "deploy accepted: stack {} ({}) in {}, bundle {}, ttl {}s",
            record.id, record.name, record.region, record.bundle, record.ttl_seconds
        );
        self.inner.emit(&record, StackEventKind::Created, None);

        // Register before spawning so a delete racing the spawn still sees a
        // provisioner that owns create settlement
        self.inner
            .provisioners
            .lock()
            .unwrap()
            .insert(record.id.clone(), None);

        let inner = Arc::clone(&self.inner);
        let task_id = record.id.clone();
        let task = tokio::spawn(async move {
            Arc::clone(&inner).run_provisioning(task_id.clone()).await;
            inner.provisioners.lock().unwrap().remove(&task_id);
        });

        let mut provisioners = self.inner.provisioners.lock().unwrap();
        if let Some(slot) = provisioners.get_mut(&record.id) {
            *slot = Some(task);
        }
        drop(provisioners);

        Ok(record.id)
    }

    /// Request deletion of a stack. Idempotent: deleting an already deleted
    /// or currently terminating stack succeeds with no side effect.
    pub async fn delete(&self, stack_id: &str) -> Result<bool> {
        let lock = self.inner.lock_for(stack_id);
        let _guard = lock.lock().await;

        let record = self.inner.store.get(stack_id).await?;
        match record.phase {
            StackPhase::Deleted => Ok(true),
            // Join the in-flight termination
            StackPhase::Terminating => Ok(true),
            _ => {
                self.inner.cancel_watchdog(stack_id);
                self.inner.store.mark_terminating(stack_id).await?;
                info!("stack {} marked terminating", stack_id);

                // While the create call is unsettled only the provisioner
                // knows whether a resource exists; it finishes the
                // termination itself once create returns.
                let create_unsettled =
                    record.provider_handle.is_none() && self.inner.provisioner_active(stack_id);
                if !create_unsettled {
                    self.inner.abort_provisioner(stack_id);
                    let inner = Arc::clone(&self.inner);
                    let id = stack_id.to_string();
                    tokio::spawn(async move { inner.run_termination(&id).await });
                }

                Ok(true)
            }
        }
    }

    /// Read-only snapshot of a stack
    pub async fn status(&self, stack_id: &str) -> Result<StackRecord> {
        Ok(self.inner.store.get(stack_id).await?)
    }

    /// All known stacks, oldest first
    pub async fn list(&self) -> Result<Vec<StackRecord>> {
        Ok(self.inner.store.list().await?)
    }

    /// Block until the stack settles in Deleted, or time out
    pub async fn wait_clean(&self, stack_id: &str, timeout: Duration) -> Result<StackRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.inner.store.get(stack_id).await?;
            if record.phase == StackPhase::Deleted {
                return Ok(record);
            }
            if Instant::now() >= deadline {
                return Err(StackError::Timeout(format!(
                    "stack {} still {} after {:?}",
                    stack_id, record.phase, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Crash-recovery pass. Re-drives interrupted terminations, retries
    /// failed deletes and re-arms watchdogs lost with a previous process.
    /// The caller schedules this periodically.
    pub async fn sweep(&self) -> Result<usize> {
        // Snapshot candidates first; each one is processed independently so
        // a slow provider delete does not stall the others
        let candidates = self.inner.store.list_unsettled().await?;
        let now = Utc::now();

        let mut touched = 0usize;
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for record in candidates {
            match record.phase {
                StackPhase::Active => {
                    if !self.inner.watchdog_armed(&record.id) {
                        if let Some(expires_at) = record.expires_at {
                            info!("sweep re-arming watchdog for stack {}", record.id);
                            arm_watchdog(&self.inner, &record.id, expires_at);
                            touched += 1;
                        }
                    }
                }
                StackPhase::Expiring => {
                    if !self.inner.watchdog_armed(&record.id) {
                        touched += 1;
                        tasks.push(self.spawn_redrive(record.id.clone()));
                    }
                }
                StackPhase::Terminating => {
                    let stale = (now - record.updated_at)
                        .to_std()
                        .map(|age| age >= self.inner.config.terminating_retry)
                        .unwrap_or(false);
                    if stale {
                        warn!("sweep re-driving stuck termination of stack {}", record.id);
                        touched += 1;
                        tasks.push(self.spawn_redrive(record.id.clone()));
                    }
                }
                StackPhase::Failed if record.delete_pending => {
                    warn!("sweep retrying failed delete of stack {}", record.id);
                    touched += 1;
                    tasks.push(self.spawn_redrive(record.id.clone()));
                }
                _ => {}
            }
        }

        for task in tasks {
            let _ = task.await;
        }

        Ok(touched)
    }

    fn spawn_redrive(&self, id: String) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.redrive(&id).await })
    }
}

impl OrchestratorInner {
    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn emit(&self, record: &StackRecord, kind: StackEventKind, detail: Option<String>) {
        let mut event = StackEvent::new(kind, record.id.clone(), record.name.clone(), record.region);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.dispatcher.publish(record.notification_topic.as_deref(), event);
    }

    fn watchdog_armed(&self, id: &str) -> bool {
        self.watchdogs.lock().unwrap().contains_key(id)
    }

    fn cancel_watchdog(&self, id: &str) {
        if let Some(handle) = self.watchdogs.lock().unwrap().remove(id) {
            handle.cancel();
        }
    }

    fn provisioner_active(&self, id: &str) -> bool {
        match self.provisioners.lock().unwrap().get(id) {
            Some(None) => true,
            Some(Some(task)) => !task.is_finished(),
            None => false,
        }
    }

    fn abort_provisioner(&self, id: &str) {
        if let Some(Some(task)) = self.provisioners.lock().unwrap().remove(id) {
            task.abort();
        }
    }

    /// Provisioning task: create the stack, poll until ready, go Active.
    ///
    /// Every decision re-checks the phase under the per-stack lock, so a
    /// delete accepted at any point wins and a stale poll result is
    /// discarded instead of applied.
    async fn run_provisioning(self: Arc<Self>, id: String) {
        // Gate: only a Pending stack starts provisioning
        let record = {
            let lock = self.lock_for(&id);
            let _guard = lock.lock().await;
            let record = match self.store.get(&id).await {
                Ok(record) => record,
                Err(err) => {
                    error!("provisioner could not load stack {}: {}", id, err);
                    return;
                }
            };
            match record.phase {
                StackPhase::Pending => {
                    if let Err(err) = self
                        .store
                        .update_phase(&id, StackPhase::Provisioning, None)
                        .await
                    {
                        error!("could not start provisioning stack {}: {}", id, err);
                        return;
                    }
                    record
                }
                StackPhase::Terminating => {
                    // Delete arrived first; nothing was ever provisioned
                    self.finalize_deleted(&record).await;
                    return;
                }
                other => {
                    warn!("provisioner found stack {} already {}, nothing to do", id, other);
                    return;
                }
            }
        };

        let spec = provision_spec(&record);
        // The create call is never cancelled mid-flight: its settlement is
        // the only proof of whether a provider resource exists to clean up
        let created = self.gateway.create(&spec).await;

        let handle = {
            let lock = self.lock_for(&id);
            let _guard = lock.lock().await;
            let current = match self.store.get(&id).await {
                Ok(current) => current,
                Err(err) => {
                    error!("provisioner could not reload stack {}: {}", id, err);
                    return;
                }
            };

            match created {
                Ok(handle) => {
                    if let Err(err) = self.store.record_handle(&id, &handle).await {
                        error!("could not record provider handle for stack {}: {}", id, err);
                        return;
                    }
                    match current.phase {
                        StackPhase::Provisioning => handle,
                        StackPhase::Terminating => {
                            // Delete superseded provisioning; clean up now
                            drop(_guard);
                            self.run_termination(&id).await;
                            return;
                        }
                        _ => return,
                    }
                }
                Err(err) => {
                    match current.phase {
                        StackPhase::Provisioning => {
                            self.fail_stack(&current, err.message().to_string()).await;
                        }
                        StackPhase::Terminating => {
                            // Create failed, so there is no resource to delete
                            self.finalize_deleted(&current).await;
                        }
                        _ => {}
                    }
                    return;
                }
            }
        };

        // Poll until the provider reports the stack ready
        let deadline = Instant::now() + self.config.provision_timeout;
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(poll_delay(
                self.config.poll_initial,
                self.config.poll_cap,
                attempt,
            ))
            .await;
            attempt += 1;

            // Authoritative phase check before each probe
            {
                let lock = self.lock_for(&id);
                let _guard = lock.lock().await;
                match self.store.get(&id).await {
                    Ok(current) => match current.phase {
                        StackPhase::Provisioning => {}
                        StackPhase::Terminating => {
                            drop(_guard);
                            self.run_termination(&id).await;
                            return;
                        }
                        _ => return,
                    },
                    Err(err) => {
                        error!("provisioner could not reload stack {}: {}", id, err);
                        return;
                    }
                }
            }

            match self.gateway.describe(&handle).await {
                Ok(probe) if probe.ready => {
                    let lock = self.lock_for(&id);
                    let _guard = lock.lock().await;
                    let current = match self.store.get(&id).await {
                        Ok(current) => current,
                        Err(err) => {
                            error!("provisioner could not reload stack {}: {}", id, err);
                            return;
                        }
                    };
                    match current.phase {
                        StackPhase::Provisioning => {
                            let expires_at =
                                Utc::now() + chrono::Duration::seconds(current.ttl_seconds as i64);
                            if let Err(err) = self.store.mark_active(&id, expires_at).await {
                                error!("could not activate stack {}: {}", id, err);
                                return;
                            }
                            arm_watchdog(&self, &id, expires_at);
                            info!("stack {} is active, expires at {}", id, expires_at);
                            self.emit(&current, StackEventKind::Active, None);
                        }
                        StackPhase::Terminating => {
                            drop(_guard);
                            self.run_termination(&id).await;
                        }
                        _ => {}
                    }
                    return;
                }
                Ok(_) => {
                    if Instant::now() >= deadline {
                        self.settle_provisioning_failure(&id, "provisioning timeout").await;
                        return;
                    }
                }
                Err(err) => {
                    self.settle_provisioning_failure(&id, err.message()).await;
                    return;
                }
            }
        }
    }

    /// Record a provisioning failure, unless a delete got there first
    async fn settle_provisioning_failure(&self, id: &str, message: &str) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let current = match self.store.get(id).await {
            Ok(current) => current,
            Err(err) => {
                error!("provisioner could not reload stack {}: {}", id, err);
                return;
            }
        };
        match current.phase {
            StackPhase::Provisioning => {
                self.fail_stack(&current, message.to_string()).await;
            }
            StackPhase::Terminating => {
                drop(_guard);
                self.run_termination(id).await;
            }
            _ => {}
        }
    }

    /// Drive a Terminating stack to Deleted, or park it as a failed delete
    /// for sweep to retry
    pub(crate) async fn run_termination(&self, id: &str) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(err) => {
                error!("terminator could not load stack {}: {}", id, err);
                return;
            }
        };
        if record.phase != StackPhase::Terminating {
            return; // settled by another actor
        }

        match &record.provider_handle {
            // No resource was ever provisioned
            None => self.finalize_deleted(&record).await,
            Some(handle) => match self.gateway.delete(handle).await {
                Ok(()) => self.finalize_deleted(&record).await,
                Err(err) => {
                    // The delete stays owed; sweep retries until it lands
                    warn!(
                        "provider delete for stack {} failed, sweep will retry: {}",
                        id, err
                    );
                    if let Err(store_err) = self
                        .store
                        .update_phase(id, StackPhase::Failed, Some(err.message()))
                        .await
                    {
                        error!("could not record delete failure for stack {}: {}", id, store_err);
                        return;
                    }
                    self.emit(&record, StackEventKind::Failed, Some(err.message().to_string()));
                }
            },
        }
    }

    /// Watchdog entry point: the TTL elapsed for `id`
    pub(crate) async fn handle_expiry(&self, id: &str) {
        // Deregister first so a late cancel has nothing to abort
        self.watchdogs.lock().unwrap().remove(id);

        {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let record = match self.store.get(id).await {
                Ok(record) => record,
                Err(err) => {
                    error!("watchdog could not load stack {}: {}", id, err);
                    return;
                }
            };
            if record.phase != StackPhase::Active {
                return; // an explicit delete won the race
            }
            if let Err(err) = self.store.update_phase(id, StackPhase::Expiring, None).await {
                error!("could not expire stack {}: {}", id, err);
                return;
            }
            self.emit(&record, StackEventKind::Expired, None);
            if let Err(err) = self.store.mark_terminating(id).await {
                error!("could not terminate expired stack {}: {}", id, err);
                return;
            }
            info!("stack {} expired after {}s ttl, terminating", id, record.ttl_seconds);
        }

        self.run_termination(id).await;
    }

    /// Sweep worker: put one unsettled stack back on the delete path
    async fn redrive(&self, id: &str) {
        {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let record = match self.store.get(id).await {
                Ok(record) => record,
                Err(err) => {
                    error!("sweep could not load stack {}: {}", id, err);
                    return;
                }
            };
            match record.phase {
                StackPhase::Expiring => {
                    if let Err(err) = self.store.mark_terminating(id).await {
                        error!("sweep could not terminate stack {}: {}", id, err);
                        return;
                    }
                }
                StackPhase::Failed if record.delete_pending => {
                    if let Err(err) = self.store.mark_terminating(id).await {
                        error!("sweep could not re-drive stack {}: {}", id, err);
                        return;
                    }
                }
                StackPhase::Terminating => {}
                _ => return, // settled since the snapshot
            }
        }

        self.run_termination(id).await;
    }

    async fn fail_stack(&self, record: &StackRecord, message: String) {
        warn!("stack {} failed: {}", record.id, message);
        if let Err(err) = self
            .store
            .update_phase(&record.id, StackPhase::Failed, Some(&message))
            .await
        {
            error!("could not record failure for stack {}: {}", record.id, err);
            return;
        }
        self.emit(record, StackEventKind::Failed, Some(message));
    }

    async fn finalize_deleted(&self, record: &StackRecord) {
        if let Err(err) = self.store.mark_deleted(&record.id, Utc::now()).await {
            error!("could not finalize deletion of stack {}: {}", record.id, err);
            return;
        }
        info!("stack {} deleted", record.id);
        self.emit(record, StackEventKind::Deleted, None);
    }
}

/// Schedule expiry for `id`, replacing any previous watchdog
fn arm_watchdog(inner: &Arc<OrchestratorInner>, id: &str, expires_at: DateTime<Utc>) {
    let handle = watchdog::arm(Arc::clone(inner), id.to_string(), expires_at);
    if let Some(old) = inner.watchdogs.lock().unwrap().insert(id.to_string(), handle) {
        old.cancel();
    }
}

fn provision_spec(record: &StackRecord) -> ProvisionSpec {
    ProvisionSpec::new(
        record.region,
        record.name.clone(),
        record.instance_name.clone(),
        record.bundle,
    )
    .with_label(STACK_ID_LABEL, record.id.clone())
}

fn generate_stack_id() -> String {
    format!("stk_{}", uuid::Uuid::new_v4().to_string().replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_delay_doubles_up_to_the_cap() {
        let initial = Duration::from_secs(5);
        let cap = Duration::from_secs(60);

        assert_eq!(poll_delay(initial, cap, 0), Duration::from_secs(5));
        assert_eq!(poll_delay(initial, cap, 1), Duration::from_secs(10));
        assert_eq!(poll_delay(initial, cap, 2), Duration::from_secs(20));
        assert_eq!(poll_delay(initial, cap, 3), Duration::from_secs(40));
        assert_eq!(poll_delay(initial, cap, 4), Duration::from_secs(60));
        assert_eq!(poll_delay(initial, cap, 30), Duration::from_secs(60));
    }

    #[test]
    fn poll_delay_survives_large_attempts() {
        let cap = Duration::from_secs(60);
        assert_eq!(poll_delay(Duration::from_secs(5), cap, u32::MAX), cap);
    }

    #[test]
    fn stack_ids_are_prefixed_and_unique() {
        let a = generate_stack_id();
        let b = generate_stack_id();
        assert!(a.starts_with("stk_"));
        assert!(a.len() > 20);
        assert_ne!(a, b);
    }

    #[test]
    fn default_config_is_sane() {
        let config = OrchestratorConfig::default();
        assert!(config.poll_initial < config.poll_cap);
        assert!(config.poll_cap < config.provision_timeout);
    }
}
