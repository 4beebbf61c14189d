//! Process-wide coordinators
//!
//! One default coordinator, installed at most once, plus any number of
//! coordinators registered by name. Lookups before installation report
//! `LockError::NotReady`.

use std::sync::{LazyLock, OnceLock};

use dashmap::DashMap;
use keylock_common::KeylockConfig;
use tracing::{info, warn};

use crate::coordinator::LockCoordinator;
use crate::error::{LockError, Result};

static DEFAULT: OnceLock<LockCoordinator> = OnceLock::new();

static NAMED: LazyLock<DashMap<String, LockCoordinator>> = LazyLock::new(DashMap::new);

/// Connect and install the default coordinator.
///
/// Connects only when nothing is installed yet; otherwise the installed
/// coordinator is returned untouched.
pub async fn init_default(config: &KeylockConfig) -> Result<LockCoordinator> {
    if let Some(existing) = DEFAULT.get() {
        return Ok(existing.clone());
    }
    let coordinator = LockCoordinator::connect(config).await?;
    adopt(&DEFAULT, coordinator).await
}

/// Install `coordinator` as the default. Returns false if one was already installed.
pub fn install_default(coordinator: LockCoordinator) -> bool {
    install(&DEFAULT, coordinator).is_ok()
}

fn install(
    slot: &OnceLock<LockCoordinator>,
    coordinator: LockCoordinator,
) -> std::result::Result<(), LockCoordinator> {
    let kind = coordinator.store().kind();
    slot.set(coordinator)?;
    info!(store = kind, "Default lock coordinator installed");
    Ok(())
}

/// Install a freshly connected coordinator, or close its store if another
/// one got installed first, and return whichever is installed
async fn adopt(
    slot: &OnceLock<LockCoordinator>,
    coordinator: LockCoordinator,
) -> Result<LockCoordinator> {
    if let Err(loser) = install(slot, coordinator) {
        warn!("Default lock coordinator installed concurrently, closing the new one");
        if let Err(e) = loser.store().close().await {
            warn!(error = %e, "Failed to close surplus store client");
        }
    }
    slot.get().cloned().ok_or(LockError::NotReady)
}

/// The default coordinator.
///
/// # Panics
///
/// Panics with [`LockError::NotReady`] if none was installed; use
/// [`try_default_coordinator`] to handle that case.
pub fn default_coordinator() -> LockCoordinator {
    match try_default_coordinator() {
        Ok(coordinator) => coordinator,
        Err(e) => panic!("{}", e),
    }
}

pub fn try_default_coordinator() -> Result<LockCoordinator> {
    DEFAULT.get().cloned().ok_or(LockError::NotReady)
}

/// Connect a coordinator and register it under `name`, replacing any previous one
pub async fn init_named(name: &str, config: &KeylockConfig) -> Result<LockCoordinator> {
    let coordinator = LockCoordinator::connect(config).await?;
    install_named(name, coordinator.clone());
    Ok(coordinator)
}

/// Register `coordinator` under `name`. Returns the coordinator it replaced.
pub fn install_named(name: &str, coordinator: LockCoordinator) -> Option<LockCoordinator> {
    info!(name = %name, store = coordinator.store().kind(), "Named lock coordinator installed");
    NAMED.insert(name.to_string(), coordinator)
}

pub fn named(name: &str) -> Option<LockCoordinator> {
    NAMED.get(name).map(|entry| entry.value().clone())
}

/// Unregister `name`
pub fn remove_named(name: &str) -> Option<LockCoordinator> {
    NAMED.remove(name).map(|(_, coordinator)| coordinator)
}
