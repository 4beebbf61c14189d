//! Lock error types

use std::time::Duration;

use keylock_store::StoreError;

/// Error type for lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock '{name}' is already held")]
    AlreadyHeld { name: String },

    #[error("timed out acquiring lock '{name}' after {waited:?}")]
    AcquireTimeout { name: String, waited: Duration },

    #[error("acquiring lock '{name}' was cancelled")]
    Cancelled { name: String },

    #[error("failed to load {operation} script: {source}")]
    ScriptLoadFailed {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to acquire lock '{name}': {source}")]
    AcquireFailed {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to release lock '{name}': {source}")]
    ReleaseFailed {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to renew lock '{name}': {source}")]
    RenewFailed {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read lock '{name}': {source}")]
    LookupFailed {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("lock '{name}' is no longer held by this token")]
    RenewMismatch { name: String },

    #[error("lock coordinator is not ready, install one first")]
    NotReady,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to connect store: {0}")]
    Connect(#[source] StoreError),
}

impl LockError {
    /// Another owner holds the lock, or held it for the whole wait
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            LockError::AlreadyHeld { .. } | LockError::AcquireTimeout { .. }
        )
    }

    /// The store could not be reached or failed; a later retry may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_contention()
            || matches!(
                self,
                LockError::ScriptLoadFailed { .. }
                    | LockError::AcquireFailed { .. }
                    | LockError::ReleaseFailed { .. }
                    | LockError::RenewFailed { .. }
                    | LockError::LookupFailed { .. }
                    | LockError::Connect(_)
            )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
