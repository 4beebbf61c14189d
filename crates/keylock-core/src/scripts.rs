//! Atomic lock scripts
//!
//! The bodies are byte-for-byte what other clients of the same keyspace run,
//! so their digests match and locks interoperate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keylock_store::{Keyspace, MemoryStore, ScriptReply, StoreError};

/// `KEYS = [lock key]`, `ARGV = [ttl seconds, token]`.
/// Replies `OK` when set, `-1` when the key already exists.
pub const ACQUIRE_SCRIPT: &str = "if redis.call('exists', KEYS[1]) == 0  then return redis.call('setex', KEYS[1], unpack(ARGV)) else return '-1' end";

/// `KEYS = [lock key]`, `ARGV = [token]`.
/// Replies `1` when deleted, nil when the key is absent or held by another token.
pub const RELEASE_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1]  then return redis.call('del', KEYS[1]) or true end";

/// `KEYS = [lock key]`, `ARGV = [token, ttl seconds]`.
/// Replies `1` when the expiry was reset, nil otherwise.
pub const RENEW_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1]  then return redis.call('expire', KEYS[1],ARGV[2]) or true end";

/// Reply of the acquire script when another token holds the key
pub const ACQUIRE_HELD_REPLY: &str = "-1";

/// The three scripted lock operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOperation {
    Acquire,
    Release,
    Renew,
}

impl LockOperation {
    pub const ALL: [LockOperation; 3] = [
        LockOperation::Acquire,
        LockOperation::Release,
        LockOperation::Renew,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockOperation::Acquire => "acquire",
            LockOperation::Release => "release",
            LockOperation::Renew => "renew",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            LockOperation::Acquire => ACQUIRE_SCRIPT,
            LockOperation::Release => RELEASE_SCRIPT,
            LockOperation::Renew => RENEW_SCRIPT,
        }
    }
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register native equivalents of the lock scripts with an in-process store
pub fn install_native_scripts(store: &MemoryStore) {
    store.register_script(ACQUIRE_SCRIPT, native_acquire);
    store.register_script(RELEASE_SCRIPT, native_release);
    store.register_script(RENEW_SCRIPT, native_renew);
}

/// An in-process store that understands the lock scripts
pub fn memory_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    install_native_scripts(&store);
    Arc::new(store)
}

fn native_acquire(ks: &mut Keyspace, keys: &[String], args: &[String]) -> keylock_store::Result<ScriptReply> {
    let key = arg(keys, 0, "KEYS")?;
    let ttl = expire_seconds(arg(args, 0, "ARGV")?, "setex")?;
    let token = arg(args, 1, "ARGV")?;

    if ks.exists(key) {
        return Ok(ScriptReply::Text(ACQUIRE_HELD_REPLY.to_string()));
    }
    ks.set(key, token, Some(ttl))?;
    Ok(ScriptReply::Text("OK".to_string()))
}

fn native_release(ks: &mut Keyspace, keys: &[String], args: &[String]) -> keylock_store::Result<ScriptReply> {
    let key = arg(keys, 0, "KEYS")?;
    let token = arg(args, 0, "ARGV")?;

    if ks.get(key).as_deref() == Some(token) {
        ks.del(key);
        return Ok(ScriptReply::Integer(1));
    }
    Ok(ScriptReply::Nil)
}

fn native_renew(ks: &mut Keyspace, keys: &[String], args: &[String]) -> keylock_store::Result<ScriptReply> {
    let key = arg(keys, 0, "KEYS")?;
    let token = arg(args, 0, "ARGV")?;
    let ttl = expire_seconds(arg(args, 1, "ARGV")?, "expire")?;

    if ks.get(key).as_deref() == Some(token) {
        ks.expire(key, ttl)?;
        return Ok(ScriptReply::Integer(1));
    }
    Ok(ScriptReply::Nil)
}

fn arg<'a>(values: &'a [String], index: usize, table: &str) -> keylock_store::Result<&'a str> {
    values
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Script(format!("{}[{}] is missing", table, index + 1)))
}

fn expire_seconds(raw: &str, command: &str) -> keylock_store::Result<Duration> {
    let secs: i64 = raw
        .parse()
        .map_err(|_| StoreError::Script("ERR value is not an integer or out of range".to_string()))?;
    // Milliseconds must fit in an i64 as well
    if secs <= 0 || secs.checked_mul(1000).is_none() {
        return Err(StoreError::Script(format!(
            "ERR invalid expire time in '{}' command",
            command
        )));
    }
    Ok(Duration::from_secs(secs as u64))
}
