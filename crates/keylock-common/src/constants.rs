//! Protocol constants shared by every keylock crate

use std::time::Duration;

/// Prefix of every lock key in the store. Other clients match on it exactly.
pub const LOCK_PREFIX: &str = "lock:";

/// Delay between two acquire attempts while polling
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

/// Environment variable prefix read by `KeylockConfig::load`
pub const ENV_PREFIX: &str = "KEYLOCK";

/// Separator between nested keys in environment variables
pub const ENV_SEPARATOR: &str = "__";

/// Virtual nodes per shard on the consistent-hash ring
pub const DEFAULT_HASH_REPLICAS: usize = 100;

/// Build the store key for a lock name
pub fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_PREFIX, name)
}
