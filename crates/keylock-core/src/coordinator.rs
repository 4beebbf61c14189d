//! Lock coordinator
//!
//! Provides:
//! - Single-shot and polling acquire, with an optional cancellation token
//! - Owner-checked release (idempotent)
//! - Owner-checked renewal
//!
//! Every state change happens inside one atomic script on the store; the
//! coordinator never reads a lock key to decide what to write.

use std::sync::Arc;
use std::time::Duration;

use keylock_common::{DEFAULT_POLL_INTERVAL, KeylockConfig, lock_key};
use keylock_store::{ScriptReply, StoreClient, StoreError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LockError, Result};
use crate::metrics::{record_acquire, record_release, record_renew};
use crate::registry::ScriptRegistry;
use crate::scripts::{ACQUIRE_HELD_REPLY, LockOperation};

/// Upper bound for the delay between acquire attempts
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);

/// Acquire, release and renew locks against one store
pub struct LockCoordinator<S: StoreClient + ?Sized = dyn StoreClient> {
    registry: Arc<ScriptRegistry<S>>,
    poll_interval: Duration,
}

impl<S: StoreClient + ?Sized> Clone for LockCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

impl LockCoordinator {
    /// Connect the configured store and wrap it in a coordinator
    pub async fn connect(config: &KeylockConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| LockError::Connect(e.into()))?;
        let store = keylock_store::connect(&config.store)
            .await
            .map_err(LockError::Connect)?;
        Ok(Self::new(store).with_poll_interval(config.lock.poll_interval()))
    }
}

impl<S: StoreClient + ?Sized> LockCoordinator<S> {
    /// Coordinator with its own script registry
    pub fn new(store: Arc<S>) -> Self {
        Self::with_registry(Arc::new(ScriptRegistry::new(store)))
    }

    /// Coordinator sharing an existing registry (and therefore its store)
    pub fn with_registry(registry: Arc<ScriptRegistry<S>>) -> Self {
        Self {
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Delay between acquire attempts while waiting
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry<S>> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        self.registry.store()
    }

    /// Load all lock scripts up front
    pub async fn preload(&self) -> Result<()> {
        self.registry.load_all().await
    }

    /// One acquire attempt with a fresh token
    pub async fn acquire_once(&self, name: &str, ttl_secs: u64) -> Result<String> {
        validate(name, ttl_secs)?;
        let started = Instant::now();
        let token = new_token();
        let outcome = self.try_acquire(name, &token, ttl_secs).await;
        record_acquire(&outcome, started.elapsed());
        outcome.map(|_| token)
    }

    /// Acquire `name`, polling for up to `max_wait` while another owner holds it.
    ///
    /// A zero `max_wait` makes a single attempt.
    pub async fn acquire(&self, name: &str, ttl_secs: u64, max_wait: Duration) -> Result<String> {
        self.acquire_with_token(name, &new_token(), ttl_secs, max_wait)
            .await
    }

    /// Like [`acquire`](Self::acquire), but stops early when `cancel` fires
    pub async fn acquire_with_cancel(
        &self,
        name: &str,
        ttl_secs: u64,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate(name, ttl_secs)?;
        let started = Instant::now();
        let token = new_token();
        let outcome = self
            .poll_acquire(name, &token, ttl_secs, max_wait, Some(cancel))
            .await;
        record_acquire(&outcome, started.elapsed());
        outcome.map(|_| token)
    }

    /// Like [`acquire`](Self::acquire), with a caller-chosen owner token
    pub async fn acquire_with_token(
        &self,
        name: &str,
        token: &str,
        ttl_secs: u64,
        max_wait: Duration,
    ) -> Result<String> {
        validate(name, ttl_secs)?;
        if token.is_empty() {
            return Err(LockError::InvalidArgument("owner token is empty".to_string()));
        }
        let started = Instant::now();
        let outcome = self
            .poll_acquire(name, token, ttl_secs, max_wait, None)
            .await;
        record_acquire(&outcome, started.elapsed());
        outcome.map(|_| token.to_string())
    }

    async fn poll_acquire(
        &self,
        name: &str,
        token: &str,
        ttl_secs: u64,
        max_wait: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let started = Instant::now();
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(LockError::Cancelled {
                name: name.to_string(),
            });
        }

        match self.try_acquire(name, token, ttl_secs).await {
            Err(LockError::AlreadyHeld { .. }) if !max_wait.is_zero() => {}
            outcome => return outcome,
        }

        debug!(
            name = %name,
            max_wait_ms = max_wait.as_millis() as u64,
            "Lock held elsewhere, polling"
        );

        // A wait too long to represent as an instant has no deadline
        let deadline_at = started.checked_add(max_wait);
        let deadline = tokio::time::sleep_until(deadline_at.unwrap_or(started));
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        let mut attempts = 1u32;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(name = %name, attempts, "Lock acquisition cancelled");
                    return Err(LockError::Cancelled { name: name.to_string() });
                }
                _ = &mut deadline, if deadline_at.is_some() => {
                    return Err(LockError::AcquireTimeout {
                        name: name.to_string(),
                        waited: started.elapsed(),
                    });
                }
                _ = ticker.tick() => {
                    attempts += 1;
                    match self.try_acquire(name, token, ttl_secs).await {
                        Err(LockError::AlreadyHeld { .. }) => {}
                        outcome => {
                            if outcome.is_ok() {
                                debug!(name = %name, attempts, "Lock acquired after polling");
                            }
                            return outcome;
                        }
                    }
                }
            }
        }
    }

    async fn try_acquire(&self, name: &str, token: &str, ttl_secs: u64) -> Result<()> {
        let script = self.registry.get(LockOperation::Acquire).await?;
        let keys = [lock_key(name)];
        let args = [ttl_secs.to_string(), token.to_string()];

        let reply = self
            .store()
            .eval_script(script, &keys, &args)
            .await
            .map_err(|source| LockError::AcquireFailed {
                name: name.to_string(),
                source,
            })?;

        match reply {
            ScriptReply::Text(s) if s == "OK" => {
                debug!(name = %name, ttl_secs, "Lock acquired");
                Ok(())
            }
            ScriptReply::Text(s) if s == ACQUIRE_HELD_REPLY => Err(LockError::AlreadyHeld {
                name: name.to_string(),
            }),
            other => Err(LockError::AcquireFailed {
                name: name.to_string(),
                source: StoreError::UnexpectedReply(other.to_string()),
            }),
        }
    }

    /// Release `name` if `token` still owns it.
    ///
    /// Succeeds when the lock is absent or owned by someone else: in both
    /// cases the caller no longer holds it.
    pub async fn release(&self, name: &str, token: &str) -> Result<()> {
        validate_name(name)?;
        let script = self.registry.get(LockOperation::Release).await?;
        let keys = [lock_key(name)];
        let args = [token.to_string()];

        let reply = self
            .store()
            .eval_script(script, &keys, &args)
            .await
            .map_err(|source| {
                record_release("error");
                LockError::ReleaseFailed {
                    name: name.to_string(),
                    source,
                }
            })?;

        match reply {
            ScriptReply::Integer(n) if n > 0 => {
                debug!(name = %name, "Lock released");
                record_release("released");
            }
            ScriptReply::Nil | ScriptReply::Integer(_) => {
                debug!(name = %name, "Lock not held by token, nothing to release");
                record_release("not_held");
            }
            other => {
                record_release("error");
                return Err(LockError::ReleaseFailed {
                    name: name.to_string(),
                    source: StoreError::UnexpectedReply(other.to_string()),
                });
            }
        }
        Ok(())
    }

    /// Reset the lifetime of `name` to `new_ttl_secs` if `token` still owns it
    pub async fn renew(&self, name: &str, token: &str, new_ttl_secs: u64) -> Result<()> {
        validate(name, new_ttl_secs)?;
        let script = self.registry.get(LockOperation::Renew).await?;
        let keys = [lock_key(name)];
        let args = [token.to_string(), new_ttl_secs.to_string()];

        let reply = self
            .store()
            .eval_script(script, &keys, &args)
            .await
            .map_err(|source| {
                record_renew("error");
                LockError::RenewFailed {
                    name: name.to_string(),
                    source,
                }
            })?;

        match reply {
            ScriptReply::Integer(n) if n > 0 => {
                debug!(name = %name, new_ttl_secs, "Lock renewed");
                record_renew("renewed");
                Ok(())
            }
            ScriptReply::Nil | ScriptReply::Integer(_) => {
                warn!(name = %name, "Lock renewal rejected, ownership lost");
                record_renew("mismatch");
                Err(LockError::RenewMismatch {
                    name: name.to_string(),
                })
            }
            other => {
                record_renew("error");
                Err(LockError::RenewFailed {
                    name: name.to_string(),
                    source: StoreError::UnexpectedReply(other.to_string()),
                })
            }
        }
    }

    /// Token currently stored for `name`, for diagnostics only
    pub async fn holder(&self, name: &str) -> Result<Option<String>> {
        validate_name(name)?;
        self.store()
            .get(&lock_key(name))
            .await
            .map_err(|source| LockError::LookupFailed {
                name: name.to_string(),
                source,
            })
    }
}

/// A fresh owner token
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LockError::InvalidArgument("lock name is empty".to_string()));
    }
    Ok(())
}

fn validate(name: &str, ttl_secs: u64) -> Result<()> {
    validate_name(name)?;
    if ttl_secs == 0 {
        return Err(LockError::InvalidArgument(
            "ttl must be at least one second".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::memory_store;

    #[test]
    fn test_new_token_is_unique_uuid() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(validate("abc", 10).is_ok());
        assert!(matches!(validate("", 10), Err(LockError::InvalidArgument(_))));
        assert!(matches!(validate("abc", 0), Err(LockError::InvalidArgument(_))));
    }

    #[test]
    fn test_poll_interval_floor() {
        let coordinator = LockCoordinator::new(memory_store()).with_poll_interval(Duration::ZERO);
        assert_eq!(coordinator.poll_interval(), Duration::from_millis(1));

        let coordinator = LockCoordinator::new(memory_store()).with_poll_interval(Duration::MAX);
        assert_eq!(coordinator.poll_interval(), MAX_POLL_INTERVAL);

        let coordinator = LockCoordinator::new(memory_store());
        assert_eq!(coordinator.poll_interval(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_acquire_stores_token_under_prefixed_key() {
        let store = memory_store();
        let coordinator = LockCoordinator::new(store.clone());

        let token = coordinator.acquire_once("abc", 10).await.unwrap();
        assert_eq!(store.get("lock:abc").await.unwrap(), Some(token.clone()));
        assert_eq!(coordinator.holder("abc").await.unwrap(), Some(token));
        assert!(store.ttl("lock:abc").await.unwrap().unwrap() <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_the_store() {
        let store = memory_store();
        let coordinator = LockCoordinator::new(store.clone());

        assert!(matches!(
            coordinator.acquire("", 10, Duration::ZERO).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.acquire_once("abc", 0).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator
                .acquire_with_token("abc", "", 10, Duration::ZERO)
                .await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.renew("abc", "t", 0).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.release("", "t").await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.holder("").await,
            Err(LockError::InvalidArgument(_))
        ));
        assert_eq!(store.script_loads(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_acquire_reply() {
        use keylock_store::MemoryStore;

        // A store whose acquire script answers something the protocol never sends
        let store = Arc::new(MemoryStore::new());
        store.register_script(LockOperation::Acquire.body(), |_, _, _| {
            Ok(ScriptReply::Integer(42))
        });
        let coordinator = LockCoordinator::new(store);

        let err = coordinator.acquire_once("abc", 10).await.unwrap_err();
        match err {
            LockError::AcquireFailed { source, .. } => {
                assert!(matches!(source, StoreError::UnexpectedReply(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_coordinators_share_registry() {
        let store = memory_store();
        let first = LockCoordinator::new(store.clone());
        let second = LockCoordinator::with_registry(first.registry().clone());

        let token = first.acquire_once("abc", 10).await.unwrap();
        second.release("abc", &token).await.unwrap();
        second.acquire_once("abc", 10).await.unwrap();

        // acquire and release, each loaded once across both coordinators
        assert_eq!(store.script_loads(), 2);
    }

    #[tokio::test]
    async fn test_holder_read_failure_is_lookup_error() {
        let store = memory_store();
        let coordinator = LockCoordinator::new(store.clone());

        store.set_offline(true);
        let err = coordinator.holder("abc").await.unwrap_err();
        assert!(matches!(
            err,
            LockError::LookupFailed { ref name, source: StoreError::Offline } if name == "abc"
        ));
        assert_eq!(
            err.to_string(),
            "failed to read lock 'abc': store is offline"
        );
    }

    mod outcome_counters {
        use std::collections::HashMap;
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicU64, Ordering};

        use ::metrics::{
            Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
        };
        use keylock_store::MemoryStore;

        use super::*;

        /// Counts every counter increment under `name{label=value,...}`
        #[derive(Default)]
        struct CountingRecorder {
            counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
        }

        impl CountingRecorder {
            fn get(&self, key: &str) -> u64 {
                self.counters
                    .lock()
                    .unwrap()
                    .get(key)
                    .map(|c| c.load(Ordering::Relaxed))
                    .unwrap_or(0)
            }
        }

        impl Recorder for CountingRecorder {
            fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

            fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
                let labels: Vec<String> = key
                    .labels()
                    .map(|l| format!("{}={}", l.key(), l.value()))
                    .collect();
                let name = format!("{}{{{}}}", key.name(), labels.join(","));
                let counter = self
                    .counters
                    .lock()
                    .unwrap()
                    .entry(name)
                    .or_default()
                    .clone();
                Counter::from_arc(counter)
            }

            fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
                Gauge::noop()
            }

            fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
                Histogram::noop()
            }
        }

        /// A store whose release and renew scripts answer with a reply the
        /// protocol never produces
        fn garbled_store() -> Arc<MemoryStore> {
            let store = Arc::new(MemoryStore::new());
            for operation in [LockOperation::Release, LockOperation::Renew] {
                store.register_script(operation.body(), |_, _, _| {
                    Ok(ScriptReply::Text("garbled".to_string()))
                });
            }
            store
        }

        #[tokio::test]
        async fn test_unexpected_replies_count_as_errors() {
            let recorder = CountingRecorder::default();
            let _guard = ::metrics::set_default_local_recorder(&recorder);
            let coordinator = LockCoordinator::new(garbled_store());

            let err = coordinator.release("abc", "t1").await.unwrap_err();
            assert!(matches!(
                err,
                LockError::ReleaseFailed { source: StoreError::UnexpectedReply(_), .. }
            ));
            assert_eq!(recorder.get("keylock_release_total{outcome=error}"), 1);

            let err = coordinator.renew("abc", "t1", 10).await.unwrap_err();
            assert!(matches!(
                err,
                LockError::RenewFailed { source: StoreError::UnexpectedReply(_), .. }
            ));
            assert_eq!(recorder.get("keylock_renew_total{outcome=error}"), 1);
        }

        #[tokio::test]
        async fn test_release_outcomes_are_counted() {
            let recorder = CountingRecorder::default();
            let _guard = ::metrics::set_default_local_recorder(&recorder);
            let coordinator = LockCoordinator::new(memory_store());

            let token = coordinator.acquire_once("abc", 10).await.unwrap();
            coordinator.release("abc", &token).await.unwrap();
            coordinator.release("abc", &token).await.unwrap();

            assert_eq!(recorder.get("keylock_acquire_total{outcome=acquired}"), 1);
            assert_eq!(recorder.get("keylock_release_total{outcome=released}"), 1);
            assert_eq!(recorder.get("keylock_release_total{outcome=not_held}"), 1);
            assert_eq!(recorder.get("keylock_release_total{outcome=error}"), 0);
        }
    }
}
