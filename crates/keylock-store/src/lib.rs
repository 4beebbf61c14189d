//! Keylock Store - key-value store client facade
//!
//! This crate provides:
//! - `StoreClient`: the capability the lock protocol consumes (atomic script
//!   execution plus plain get/set/del/expire)
//! - Redis clients for three topologies: standalone, cluster and ring
//! - `MemoryStore`: an in-process store with native script handlers
//! - `connect`: builds the client a `StoreConfig` asks for

pub mod client;
pub mod cluster;
mod command;
pub mod error;
pub mod memory;
pub mod ring;
pub mod standalone;

use std::sync::Arc;

use keylock_common::{StoreConfig, Topology};
use tracing::info;

pub use client::{ScriptHandle, ScriptReply, StoreClient, script_digest};
pub use cluster::ClusterStore;
pub use error::{Result, StoreError};
pub use memory::{Keyspace, MemoryStore, ScriptFn};
pub use ring::{HashRing, RingStore};
pub use standalone::StandaloneStore;

/// Build and ping the client for the configured topology
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StoreClient>> {
    config.validate()?;

    let store: Arc<dyn StoreClient> = match config.topology {
        Topology::Standalone => {
            Arc::new(StandaloneStore::connect(&config.standalone, &config.connection).await?)
        }
        Topology::Cluster => {
            Arc::new(ClusterStore::connect(&config.cluster, &config.connection).await?)
        }
        Topology::Ring => Arc::new(RingStore::connect(&config.ring, &config.connection).await?),
    };

    store
        .ping()
        .await
        .map_err(|e| StoreError::Ping(format!("{} store: {}", config.topology, e)))?;

    info!(topology = %config.topology, "Store client ready");
    Ok(store)
}
