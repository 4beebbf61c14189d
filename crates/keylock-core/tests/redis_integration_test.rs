//! Keylock Redis Integration Tests
//!
//! These tests require a running Redis server.
//!
//! To run these tests:
//! 1. Start Redis (e.g. `docker run -p 6379:6379 redis:7`)
//! 2. Run: REDIS_URL=127.0.0.1:6379 cargo test -p keylock-core --test redis_integration_test -- --ignored

use std::time::Duration;

use keylock_common::{KeylockConfig, StoreConfig};
use keylock_core::{LockCoordinator, LockError, lock_key, scripts};
use keylock_store::script_digest;

fn test_config() -> KeylockConfig {
    let addr = std::env::var("REDIS_URL").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    KeylockConfig {
        store: StoreConfig::standalone(&addr),
        ..Default::default()
    }
}

fn unique_name(name: &str) -> String {
    format!("keylock-it-{}-{}", name, uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn test_lock_lifecycle() -> anyhow::Result<()> {
    let locks = LockCoordinator::connect(&test_config()).await?;
    let name = unique_name("lifecycle");

    let token = locks.acquire(&name, 10, Duration::ZERO).await?;
    assert_eq!(locks.store().get(&lock_key(&name)).await?, Some(token.clone()));

    let err = locks.acquire(&name, 10, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, LockError::AlreadyHeld { .. }));

    locks.renew(&name, &token, 30).await?;
    let ttl = locks.store().ttl(&lock_key(&name)).await?.expect("lock has an expiry");
    assert!(ttl > Duration::from_secs(10));

    assert!(matches!(
        locks.renew(&name, "intruder", 30).await,
        Err(LockError::RenewMismatch { .. })
    ));

    locks.release(&name, "intruder").await?;
    assert!(locks.holder(&name).await?.is_some());

    locks.release(&name, &token).await?;
    locks.release(&name, &token).await?;
    assert_eq!(locks.holder(&name).await?, None);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_polling_outlives_abandoned_lock() -> anyhow::Result<()> {
    let locks = LockCoordinator::connect(&test_config()).await?;
    let name = unique_name("abandoned");

    let _abandoned = locks.acquire(&name, 1, Duration::ZERO).await?;

    let started = std::time::Instant::now();
    let token = locks.acquire(&name, 5, Duration::from_secs(3)).await?;
    assert!(started.elapsed() >= Duration::from_millis(900));

    locks.release(&name, &token).await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_timeout_against_live_holder() -> anyhow::Result<()> {
    let locks = LockCoordinator::connect(&test_config()).await?;
    let name = unique_name("timeout");
    let token = locks.acquire(&name, 10, Duration::ZERO).await?;

    let started = std::time::Instant::now();
    let err = locks
        .acquire(&name, 10, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::AcquireTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(300));

    locks.release(&name, &token).await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_server_digests_match_local_digests() -> anyhow::Result<()> {
    let locks = LockCoordinator::connect(&test_config()).await?;
    locks.preload().await?;

    for operation in scripts::LockOperation::ALL {
        let handle = locks.registry().get(operation).await?;
        assert_eq!(handle.sha(), script_digest(operation.body()));
    }
    Ok(())
}
