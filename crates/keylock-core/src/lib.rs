//! Keylock Core - distributed mutual exclusion over a key-value store
//!
//! This crate provides:
//! - `LockCoordinator`: acquire (single-shot, polling, cancellable), release, renew
//! - `ScriptRegistry`: lazily loaded atomic scripts shared per store client
//! - Process-wide default and named coordinators
//! - Outcome counters through the `metrics` facade
//!
//! A lock named `n` lives at key `lock:n` and holds its owner's token.

pub mod coordinator;
pub mod error;
pub mod global;
pub mod metrics;
pub mod registry;
pub mod scripts;

pub use coordinator::{LockCoordinator, new_token};
pub use error::{LockError, Result};
pub use global::{
    default_coordinator, init_default, init_named, install_default, install_named, named,
    remove_named, try_default_coordinator,
};
pub use crate::metrics::describe_metrics;
pub use registry::ScriptRegistry;
pub use scripts::{LockOperation, install_native_scripts, memory_store};

pub use keylock_common::{KeylockConfig, LOCK_PREFIX, lock_key};
pub use keylock_store::StoreClient;
pub use tokio_util::sync::CancellationToken;
