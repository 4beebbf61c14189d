//! Script registry
//!
//! Holds one lazily loaded handle per lock operation. A registry belongs to
//! one store client and is shared (through `Arc`) by every coordinator built
//! on that client, so each script is submitted to the store once per process
//! rather than once per coordinator.

use std::sync::Arc;

use keylock_store::{ScriptHandle, StoreClient};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{LockError, Result};
use crate::metrics::record_script_load;
use crate::scripts::LockOperation;

pub struct ScriptRegistry<S: StoreClient + ?Sized = dyn StoreClient> {
    store: Arc<S>,
    acquire: OnceCell<ScriptHandle>,
    release: OnceCell<ScriptHandle>,
    renew: OnceCell<ScriptHandle>,
}

impl<S: StoreClient + ?Sized> ScriptRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            acquire: OnceCell::new(),
            release: OnceCell::new(),
            renew: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn cell(&self, operation: LockOperation) -> &OnceCell<ScriptHandle> {
        match operation {
            LockOperation::Acquire => &self.acquire,
            LockOperation::Release => &self.release,
            LockOperation::Renew => &self.renew,
        }
    }

    /// Whether `operation` already has a cached handle
    pub fn is_loaded(&self, operation: LockOperation) -> bool {
        self.cell(operation).initialized()
    }

    /// Handle for `operation`, submitting its script on first use.
    ///
    /// Concurrent first callers wait on a single submission. A failed
    /// submission caches nothing, so the next call tries again.
    pub async fn get(&self, operation: LockOperation) -> Result<&ScriptHandle> {
        self.cell(operation)
            .get_or_try_init(|| self.load(operation))
            .await
    }

    /// Make sure `operation` has a cached handle
    pub async fn ensure_loaded(&self, operation: LockOperation) -> Result<()> {
        self.get(operation).await.map(|_| ())
    }

    /// Load every lock script
    pub async fn load_all(&self) -> Result<()> {
        for operation in LockOperation::ALL {
            self.ensure_loaded(operation).await?;
        }
        Ok(())
    }

    async fn load(&self, operation: LockOperation) -> Result<ScriptHandle> {
        match self.store.script_load(operation.body()).await {
            Ok(sha) => {
                debug!(
                    operation = operation.as_str(),
                    sha = %sha,
                    store = self.store.kind(),
                    "Lock script loaded"
                );
                record_script_load(operation, true);
                Ok(ScriptHandle::new(operation.as_str(), sha, operation.body()))
            }
            Err(e) => {
                warn!(operation = operation.as_str(), error = %e, "Failed to load lock script");
                record_script_load(operation, false);
                Err(LockError::ScriptLoadFailed {
                    operation: operation.as_str(),
                    source: e,
                })
            }
        }
    }
}
