//! In-process store
//!
//! Keeps the keyspace in memory behind one mutex and runs "scripts" as native
//! handlers registered against the digest of their body, so every script
//! execution is atomic exactly as on a real store. Expiry is lazy and follows
//! the tokio clock, which lets tests drive TTLs with a paused runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::client::{ScriptHandle, ScriptReply, StoreClient, script_digest};
use crate::error::{Result, StoreError};

/// Native stand-in for a script body
pub type ScriptFn =
    Arc<dyn Fn(&mut Keyspace, &[String], &[String]) -> Result<ScriptReply> + Send + Sync>;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// The key-value data seen by script handlers
#[derive(Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.live(key).map(|e| e.value.clone())
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| deadline(ttl, "set")).transpose()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let expires_at = deadline(ttl, "expire")?;
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn ttl(&mut self, key: &str) -> Option<Duration> {
        let expires_at = self.live(key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys
    pub fn len(&mut self) -> usize {
        let now = Instant::now();
        self.entries.retain(|_, e| !e.is_expired(now));
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// Expiry instant for `ttl` from now; a TTL past the clock's range is rejected
/// the way the store rejects it
fn deadline(ttl: Duration, command: &str) -> Result<Instant> {
    Instant::now().checked_add(ttl).ok_or_else(|| {
        StoreError::Script(format!("ERR invalid expire time in '{}' command", command))
    })
}

struct RegisteredScript {
    body: String,
    handler: ScriptFn,
}

/// In-process `StoreClient`
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    /// Every script this store knows how to run, by digest
    scripts: DashMap<String, RegisteredScript>,
    /// Digests currently in the script cache
    cached: DashSet<String>,
    offline: AtomicBool,
    closed: AtomicBool,
    script_loads: AtomicU64,
    eval_fallbacks: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            scripts: DashMap::new(),
            cached: DashSet::new(),
            offline: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            script_loads: AtomicU64::new(0),
            eval_fallbacks: AtomicU64::new(0),
        }
    }

    /// Teach the store how to run `body`. Returns the body's digest.
    pub fn register_script<F>(&self, body: &str, handler: F) -> String
    where
        F: Fn(&mut Keyspace, &[String], &[String]) -> Result<ScriptReply> + Send + Sync + 'static,
    {
        let sha = script_digest(body);
        self.scripts.insert(
            sha.clone(),
            RegisteredScript {
                body: body.to_string(),
                handler: Arc::new(handler),
            },
        );
        sha
    }

    /// Simulate a lost connection: every operation fails with `Offline`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Empty the script cache, as `SCRIPT FLUSH` or a store restart would
    pub fn flush_scripts(&self) {
        self.cached.clear();
    }

    /// Successful `script_load` calls so far
    pub fn script_loads(&self) -> u64 {
        self.script_loads.load(Ordering::Relaxed)
    }

    /// Script executions that had to resend the body
    pub fn eval_fallbacks(&self) -> u64 {
        self.eval_fallbacks.load(Ordering::Relaxed)
    }

    /// Run `f` against the keyspace directly
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        f(&mut self.keyspace.lock())
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if self.offline.load(Ordering::Acquire) {
            return Err(StoreError::Offline);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        self.check()?;
        let sha = script_digest(body);
        if !self.scripts.contains_key(&sha) {
            return Err(StoreError::UnknownScript(sha));
        }
        self.cached.insert(sha.clone());
        self.script_loads.fetch_add(1, Ordering::Relaxed);
        Ok(sha)
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        self.check()?;
        let handler = {
            let registered = self
                .scripts
                .get(script.sha())
                .ok_or_else(|| StoreError::UnknownScript(script.sha().to_string()))?;
            if registered.body != script.body() {
                return Err(StoreError::Script(format!(
                    "body does not match digest {}",
                    script.sha()
                )));
            }
            registered.handler.clone()
        };

        if !self.cached.contains(script.sha()) {
            debug!(script = script.name(), "Script missing from memory cache, evaluating body");
            self.eval_fallbacks.fetch_add(1, Ordering::Relaxed);
            self.cached.insert(script.sha().to_string());
        }

        let mut keyspace = self.keyspace.lock();
        handler(&mut keyspace, keys, args)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.keyspace.lock().get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.keyspace.lock().set(key, value, ttl)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.keyspace.lock().del(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.keyspace.lock().expire(key, ttl)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check()?;
        Ok(self.keyspace.lock().ttl(key))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
