// Metrics for lock operations
// Counters per outcome plus acquire wait time, recorded through the metrics facade

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::error::LockError;
use crate::scripts::LockOperation;

/// Register metric descriptions with the installed recorder.
/// Call once after installing an exporter.
pub fn describe_metrics() {
    describe_counter!(
        "keylock_acquire_total",
        "Total number of lock acquisitions by outcome"
    );
    describe_histogram!(
        "keylock_acquire_wait_seconds",
        "Time spent acquiring a lock, polling included"
    );
    describe_counter!(
        "keylock_release_total",
        "Total number of lock releases by outcome"
    );
    describe_counter!(
        "keylock_renew_total",
        "Total number of lock renewals by outcome"
    );
    describe_counter!(
        "keylock_script_load_total",
        "Total number of lock script loads by operation and outcome"
    );

    tracing::debug!("Lock metrics described");
}

/// Outcome label of an acquire attempt
pub fn acquire_outcome(outcome: &Result<(), LockError>) -> &'static str {
    match outcome {
        Ok(()) => "acquired",
        Err(LockError::AlreadyHeld { .. }) => "held",
        Err(LockError::AcquireTimeout { .. }) => "timeout",
        Err(LockError::Cancelled { .. }) => "cancelled",
        Err(LockError::InvalidArgument(_)) => "invalid",
        Err(_) => "error",
    }
}

/// Record a finished acquire call
pub fn record_acquire(outcome: &Result<(), LockError>, waited: Duration) {
    let label = acquire_outcome(outcome);
    counter!("keylock_acquire_total", "outcome" => label).increment(1);
    histogram!("keylock_acquire_wait_seconds", "outcome" => label).record(waited.as_secs_f64());
}

/// Record a release; `outcome` is `released`, `not_held` or `error`
pub fn record_release(outcome: &'static str) {
    counter!("keylock_release_total", "outcome" => outcome).increment(1);
}

/// Record a renewal; `outcome` is `renewed`, `mismatch` or `error`
pub fn record_renew(outcome: &'static str) {
    counter!("keylock_renew_total", "outcome" => outcome).increment(1);
}

/// Record a script load
pub fn record_script_load(operation: LockOperation, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("keylock_script_load_total", "operation" => operation.as_str(), "outcome" => outcome)
        .increment(1);
}
