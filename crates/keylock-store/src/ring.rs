//! Sharded ring store client
//!
//! A ring is a set of independent named shards. Each key lives on exactly one
//! shard, picked by a consistent-hash ring, so a lock key and every script
//! touching it always meet on the same shard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keylock_common::{ConnectionOptions, RingConfig};
use md5::{Digest, Md5};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::client::{ScriptHandle, ScriptReply, StoreClient};
use crate::command;
use crate::error::{Result, StoreError};
use crate::standalone::open_manager;

/// Consistent-hash ring over shard indexes
#[derive(Debug, Clone)]
pub struct HashRing {
    /// (point, shard index), sorted by point
    points: Vec<(u64, usize)>,
    shards: usize,
}

impl HashRing {
    /// Place `replicas` virtual nodes for each shard name
    pub fn new<S: AsRef<str>>(shards: &[S], replicas: usize) -> Self {
        let mut points = Vec::with_capacity(shards.len() * replicas);
        for (index, name) in shards.iter().enumerate() {
            for replica in 0..replicas {
                let point = hash(format!("{}-{}", name.as_ref(), replica).as_bytes());
                points.push((point, index));
            }
        }
        points.sort_unstable();
        Self {
            points,
            shards: shards.len(),
        }
    }

    /// Index of the shard owning `key`; `None` for an empty ring
    pub fn locate(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let h = hash(key.as_bytes());
        let pos = self.points.partition_point(|(point, _)| *point < h);
        let (_, shard) = self.points[pos % self.points.len()];
        Some(shard)
    }

    pub fn shard_count(&self) -> usize {
        self.shards
    }
}

fn hash(data: &[u8]) -> u64 {
    Md5::digest(data)
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

struct Shard {
    name: String,
    addr: String,
    conn: ConnectionManager,
}

/// Client for a ring of independent shards
pub struct RingStore {
    ring: HashRing,
    shards: Vec<Shard>,
    closed: AtomicBool,
}

impl RingStore {
    pub async fn connect(config: &RingConfig, options: &ConnectionOptions) -> Result<Self> {
        let mut shards = Vec::with_capacity(config.shards.len());
        for (name, addr) in &config.shards {
            let conn = open_manager(addr, options).await?;
            debug!(shard = %name, addr = %addr, "Connected ring shard");
            shards.push(Shard {
                name: name.clone(),
                addr: addr.clone(),
                conn,
            });
        }

        let names: Vec<&str> = shards.iter().map(|s| s.name.as_str()).collect();
        let ring = HashRing::new(&names, config.hash_replicas);
        info!(
            shards = shards.len(),
            hash_replicas = config.hash_replicas,
            "Connected to ring store"
        );

        Ok(Self {
            ring,
            shards,
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the shard owning `key`
    pub fn shard_name(&self, key: &str) -> Option<&str> {
        self.ring
            .locate(key)
            .map(|index| self.shards[index].name.as_str())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn shard_for(&self, key: Option<&str>) -> Result<ConnectionManager> {
        self.ensure_open()?;
        let index = match key {
            Some(key) => self.ring.locate(key),
            None if !self.shards.is_empty() => Some(0),
            None => None,
        };
        index
            .map(|i| self.shards[i].conn.clone())
            .ok_or_else(|| StoreError::InvalidAddress("ring has no shards".to_string()))
    }
}

#[async_trait]
impl StoreClient for RingStore {
    fn kind(&self) -> &'static str {
        "ring"
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        for shard in &self.shards {
            command::ping(&mut shard.conn.clone())
                .await
                .map_err(|e| StoreError::Ping(format!("shard '{}' ({}): {}", shard.name, shard.addr, e)))?;
        }
        Ok(())
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        self.ensure_open()?;
        let mut digest = None;
        for shard in &self.shards {
            let sha = command::script_load(&mut shard.conn.clone(), body).await?;
            digest = Some(sha);
        }
        digest.ok_or_else(|| StoreError::InvalidAddress("ring has no shards".to_string()))
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        let mut conn = self.shard_for(keys.first().map(String::as_str))?;
        command::eval_script(&mut conn, script, keys, args).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        command::get(&mut self.shard_for(Some(key))?, key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        command::set(&mut self.shard_for(Some(key))?, key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        command::del(&mut self.shard_for(Some(key))?, key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        command::expire(&mut self.shard_for(Some(key))?, key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        command::ttl(&mut self.shard_for(Some(key))?, key).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(shards = self.shards.len(), "Ring store client closed");
        }
        Ok(())
    }
}
