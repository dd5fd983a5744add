//! Utilities for logging.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    HumanReadable,
    Json,
}

static INIT: Once = Once::new();

/// Configure the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `default_level`. Only the first
/// call installs a subscriber, later calls are no-ops.
pub fn configure_global_logger(default_level: Level, format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let builder = FmtSubscriber::builder()
            .with_env_filter(env_filter)
            .with_file(true)
            .with_line_number(true);

        // Another subscriber may already be installed by the embedding
        // application, that's fine.
        let _ = match format {
            LogFormat::HumanReadable => {
                tracing::subscriber::set_global_default(builder.finish())
            }
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        };
    });
}

/// Configure logging for tests, writing through the test harness so output is
/// captured per test.
pub fn configure_test_logger() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(Level::DEBUG.into())
            .from_env_lossy();

        let subscriber = FmtSubscriber::builder()
            .with_test_writer()
            .with_env_filter(env_filter)
            .with_file(true)
            .with_line_number(true)
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_twice() {
        configure_test_logger();
        configure_global_logger(Level::INFO, LogFormat::Json);
        tracing::debug!("still alive");
    }
}
