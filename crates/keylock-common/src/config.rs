//! Store connection configuration
//!
//! Configuration is layered the same way for every binary: an optional file
//! (TOML, YAML or JSON, chosen by extension) overridden by `KEYLOCK__*`
//! environment variables. Every field has a default, so an empty source
//! yields a standalone client on `127.0.0.1:6379`.
//!
//! ```toml
//! [store]
//! topology = "cluster"
//!
//! [store.cluster]
//! addrs = ["10.0.0.1:7000", "10.0.0.2:7000"]
//!
//! [store.connection]
//! password = "secret"
//! read_timeout_ms = 1000
//!
//! [lock]
//! poll_interval_ms = 50
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HASH_REPLICAS, DEFAULT_POLL_INTERVAL_MS, ENV_PREFIX, ENV_SEPARATOR};
use crate::error::{ConfigError, Result};

/// Store deployment topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// A single store endpoint
    #[default]
    #[serde(alias = "alone")]
    Standalone,
    /// A Redis Cluster, addressed through a seed list
    Cluster,
    /// Independent named shards; keys are placed by consistent hashing
    #[serde(alias = "sentinel")]
    Ring,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Standalone => "standalone",
            Topology::Cluster => "cluster",
            Topology::Ring => "ring",
        };
        f.write_str(name)
    }
}

/// Settings shared by every topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Logical database (ignored by cluster, which only has db 0)
    pub db: i64,
    /// Reconnect attempts before a command fails
    pub max_retries: usize,
    /// Backoff before the first reconnect attempt, in milliseconds
    pub min_retry_backoff_ms: u64,
    /// Upper bound on the reconnect backoff, in milliseconds
    pub max_retry_backoff_ms: u64,
    /// Timeout for establishing a connection, in milliseconds
    pub dial_timeout_ms: u64,
    /// Timeout for reading a reply, in milliseconds
    pub read_timeout_ms: u64,
    /// Timeout for writing a command, in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            db: 0,
            max_retries: 3,
            min_retry_backoff_ms: 8,
            max_retry_backoff_ms: 512,
            dial_timeout_ms: 5000,
            read_timeout_ms: 3000,
            write_timeout_ms: 3000,
        }
    }
}

impl ConnectionOptions {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Round-trip budget for one command: the redis driver has a single
    /// response timeout covering both directions.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(self.write_timeout_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.dial_timeout_ms == 0 {
            return Err(invalid("connection.dial_timeout_ms must be greater than 0"));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(invalid(
                "connection.read_timeout_ms and connection.write_timeout_ms must be greater than 0",
            ));
        }
        if self.min_retry_backoff_ms > self.max_retry_backoff_ms {
            return Err(invalid(format!(
                "connection.min_retry_backoff_ms ({}) exceeds connection.max_retry_backoff_ms ({})",
                self.min_retry_backoff_ms, self.max_retry_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Single endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    /// `host:port`, or a full `redis://`, `rediss://` or `unix://` URL
    pub addr: String,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
        }
    }
}

/// Cluster settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed list of `host:port` addresses
    pub addrs: Vec<String>,
    /// Route read-only commands to replicas
    pub read_from_replicas: bool,
}

/// Ring settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Shard name to `host:port`
    pub shards: BTreeMap<String, String>,
    /// Virtual nodes per shard on the hash ring
    pub hash_replicas: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            shards: BTreeMap::new(),
            hash_replicas: DEFAULT_HASH_REPLICAS,
        }
    }
}

/// Everything needed to build a store client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub topology: Topology,
    pub standalone: StandaloneConfig,
    pub cluster: ClusterConfig,
    pub ring: RingConfig,
    pub connection: ConnectionOptions,
}

impl StoreConfig {
    /// Standalone config pointing at `addr`
    pub fn standalone(addr: &str) -> Self {
        Self {
            topology: Topology::Standalone,
            standalone: StandaloneConfig {
                addr: addr.to_string(),
            },
            ..Default::default()
        }
    }

    /// Cluster config with the given seed list
    pub fn cluster(addrs: Vec<String>) -> Self {
        Self {
            topology: Topology::Cluster,
            cluster: ClusterConfig {
                addrs,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Ring config with the given shards
    pub fn ring(shards: BTreeMap<String, String>) -> Self {
        Self {
            topology: Topology::Ring,
            ring: RingConfig {
                shards,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set credentials
    pub fn with_auth(mut self, username: Option<&str>, password: &str) -> Self {
        self.connection.username = username.map(str::to_string);
        self.connection.password = Some(password.to_string());
        self
    }

    /// Check ranges and that the selected topology has somewhere to connect
    pub fn validate(&self) -> Result<()> {
        match self.topology {
            Topology::Standalone => {
                if self.standalone.addr.trim().is_empty() {
                    return Err(invalid("standalone.addr is empty"));
                }
            }
            Topology::Cluster => {
                if self.cluster.addrs.is_empty() {
                    return Err(invalid("cluster.addrs is empty"));
                }
                if self.cluster.addrs.iter().any(|a| a.trim().is_empty()) {
                    return Err(invalid("cluster.addrs contains an empty address"));
                }
            }
            Topology::Ring => {
                if self.ring.shards.is_empty() {
                    return Err(invalid("ring.shards is empty"));
                }
                if let Some((name, _)) = self.ring.shards.iter().find(|(_, a)| a.trim().is_empty()) {
                    return Err(invalid(format!("ring shard '{}' has an empty address", name)));
                }
                if self.ring.hash_replicas == 0 {
                    return Err(invalid("ring.hash_replicas must be greater than 0"));
                }
            }
        }
        self.connection.validate()
    }
}

/// Lock protocol tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Delay between acquire attempts while waiting, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl LockSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeylockConfig {
    pub store: StoreConfig,
    pub lock: LockSettings,
}

impl KeylockConfig {
    /// Load from an optional file plus `KEYLOCK__*` environment variables,
    /// then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .with_list_parse_key("store.cluster.addrs")
                .try_parsing(true),
        );

        let config: KeylockConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        if self.lock.poll_interval_ms == 0 {
            return Err(invalid("lock.poll_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
