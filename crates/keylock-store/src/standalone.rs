//! Single endpoint store client

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keylock_common::{ConnectionOptions, StandaloneConfig};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::info;

use crate::client::{ScriptHandle, ScriptReply, StoreClient};
use crate::command;
use crate::error::{Result, StoreError};

/// Client for a single store endpoint.
///
/// Backed by a multiplexed `ConnectionManager` that reconnects with
/// exponential backoff; clones of the manager share the connection.
pub struct StandaloneStore {
    addr: String,
    conn: ConnectionManager,
    closed: AtomicBool,
}

/// Reconnect and timeout settings for one managed connection
pub(crate) fn manager_config(options: &ConnectionOptions) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(options.max_retries)
        .set_factor(options.min_retry_backoff_ms.max(1))
        .set_max_delay(options.max_retry_backoff_ms)
        .set_connection_timeout(options.dial_timeout())
        .set_response_timeout(options.response_timeout())
}

/// Open one managed connection to `addr`
pub(crate) async fn open_manager(addr: &str, options: &ConnectionOptions) -> Result<ConnectionManager> {
    let info = command::connection_info(addr, options, true)?;
    let client = redis::Client::open(info)?;
    let conn = ConnectionManager::new_with_config(client, manager_config(options)).await?;
    Ok(conn)
}

impl StandaloneStore {
    pub async fn connect(config: &StandaloneConfig, options: &ConnectionOptions) -> Result<Self> {
        let conn = open_manager(&config.addr, options).await?;
        info!(addr = %config.addr, db = options.db, "Connected to standalone store");

        Ok(Self {
            addr: config.addr.clone(),
            conn,
            closed: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connection(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }
}

#[async_trait]
impl StoreClient for StandaloneStore {
    fn kind(&self) -> &'static str {
        "standalone"
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
            info!(addr = %self.addr, "Standalone store client closed");
        }
        Ok(())
    }
}
