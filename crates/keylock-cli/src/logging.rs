//! Console logging for the command-line client

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Stdout stays reserved for
/// command output such as tokens.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter);

    // A subscriber may already be installed when embedded in tests
    let _ = tracing_subscriber::registry().with(console_layer).try_init();
}
