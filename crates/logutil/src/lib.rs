//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install a global subscriber. The level can be overridden with `RUST_LOG`.
///
/// Does nothing if a subscriber is already installed.
pub fn init(default_level: Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true);

    let _ = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
}

/// Install a subscriber writing through the test harness, at debug level
/// unless `RUST_LOG` says otherwise.
pub fn init_test() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::DEBUG.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
