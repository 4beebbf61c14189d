//! Lookups before any default coordinator is installed
//!
//! Kept in its own test binary: nothing here may install a default.

use keylock_core::{LockError, default_coordinator, try_default_coordinator};

#[test]
fn test_try_default_reports_not_ready() {
    assert!(matches!(try_default_coordinator(), Err(LockError::NotReady)));
}

#[test]
#[should_panic(expected = "lock coordinator is not ready")]
fn test_default_panics_when_not_ready() {
    let _ = default_coordinator();
}
