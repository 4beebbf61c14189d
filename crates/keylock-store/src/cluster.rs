//! Cluster store client

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keylock_common::{ClusterConfig, ConnectionOptions};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use tracing::info;

use crate::client::{ScriptHandle, ScriptReply, StoreClient};
use crate::command;
use crate::error::{Result, StoreError};

/// Client for a Redis Cluster.
///
/// Commands are routed by key slot, so a lock script always runs on the
/// primary that owns its lock key.
pub struct ClusterStore {
    seeds: Vec<String>,
    conn: ClusterConnection,
    closed: AtomicBool,
}

impl ClusterStore {
    pub async fn connect(config: &ClusterConfig, options: &ConnectionOptions) -> Result<Self> {
        let nodes = config
            .addrs
            .iter()
            .map(|addr| command::connection_info(addr, options, false))
            .collect::<Result<Vec<_>>>()?;

        let mut builder = ClusterClientBuilder::new(nodes)
            .retries(options.max_retries as u32)
            .min_retry_wait(options.min_retry_backoff_ms)
            .max_retry_wait(options.max_retry_backoff_ms)
            .connection_timeout(options.dial_timeout())
            .response_timeout(options.response_timeout());
        if let Some(username) = &options.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &options.password {
            builder = builder.password(password.clone());
        }
        if config.read_from_replicas {
            builder = builder.read_from_replicas();
        }

        let client = builder.build()?;
        let conn = client.get_async_connection().await?;
        info!(seeds = ?config.addrs, "Connected to cluster store");

        Ok(Self {
            seeds: config.addrs.clone(),
            conn,
            closed: AtomicBool::new(false),
        })
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    fn connection(&self) -> Result<ClusterConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }
}

#[async_trait]
impl StoreClient for ClusterStore {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    async fn ping(&self) -> Result<()> {
        command::ping(&mut self.connection()?).await
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        command::script_load(&mut self.connection()?, body).await
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        command::eval_script(&mut self.connection()?, script, keys, args).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        command::get(&mut self.connection()?, key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        command::set(&mut self.connection()?, key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        command::del(&mut self.connection()?, key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        command::expire(&mut self.connection()?, key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        command::ttl(&mut self.connection()?, key).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(seeds = ?self.seeds, "Cluster store client closed");
        }
        Ok(())
    }
}
