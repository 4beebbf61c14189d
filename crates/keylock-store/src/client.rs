//! Store client capability consumed by the lock protocol

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A script registered with the store's script cache.
///
/// Carries the body as well as the digest so a client can fall back to a
/// full `EVAL` when the store has lost its cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    name: &'static str,
    sha: String,
    body: &'static str,
}

impl ScriptHandle {
    pub fn new(name: &'static str, sha: impl Into<String>, body: &'static str) -> Self {
        Self {
            name,
            sha: sha.into(),
            body,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn body(&self) -> &'static str {
        self.body
    }
}

/// SHA1 digest the store assigns to a script body
pub fn script_digest(body: &str) -> String {
    redis::Script::new(body).get_hash().to_string()
}

/// Result of a script execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    /// Nil bulk reply (a Lua `false` or nothing returned)
    Nil,
    Integer(i64),
    /// Bulk or status string; status `OK` arrives as `Text("OK")`
    Text(String),
    List(Vec<ScriptReply>),
}

impl ScriptReply {
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptReply::Nil)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScriptReply::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScriptReply::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptReply::Nil => f.write_str("(nil)"),
            ScriptReply::Integer(n) => write!(f, "(integer) {}", n),
            ScriptReply::Text(s) => write!(f, "\"{}\"", s),
            ScriptReply::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Store client capability
///
/// One implementation per deployment topology; callers never branch on
/// which one they hold. Script execution must be atomic with respect to
/// every other client of the store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Topology name, for logs
    fn kind(&self) -> &'static str;

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Submit a script body to the store's script cache, returning its digest
    async fn script_load(&self, body: &str) -> Result<String>;

    /// Execute a cached script atomically against `keys`
    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key`, with an expiry when `ttl` is given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`; `true` if it existed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Reset the expiry of `key`; `true` if it existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of `key`; `None` if it is absent or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Stop serving requests. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_digest_is_sha1_hex() {
        let digest = script_digest("return 1");
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, script_digest("return 1"));
        assert_ne!(digest, script_digest("return 2"));
    }

    #[test]
    fn test_reply_accessors() {
        assert!(ScriptReply::Nil.is_nil());
        assert_eq!(ScriptReply::Text("OK".into()).as_text(), Some("OK"));
        assert_eq!(ScriptReply::Integer(1).as_integer(), Some(1));
        assert_eq!(ScriptReply::Integer(1).as_text(), None);
    }

    #[test]
    fn test_reply_display() {
        let reply = ScriptReply::List(vec![
            ScriptReply::Integer(1),
            ScriptReply::Text("-1".into()),
            ScriptReply::Nil,
        ]);
        assert_eq!(reply.to_string(), "[(integer) 1, \"-1\", (nil)]");
    }
}
