use std::env;
use std::io::{IsTerminal, stderr};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable: ANSI text on a terminal, JSON otherwise.
/// `RUST_LOG` selects the level and defaults to `info`.
pub fn setup_logging() {
    let is_terminal = stderr().is_terminal();
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let installed = if is_terminal {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(stderr)
            .with_ansi(true)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(stderr)
            .with_ansi(false)
            .with_target(true)
            .try_init()
    };
    if installed.is_ok() {
        tracing::debug!("Logging initialized with level: {:?}", log_level);
    }
}
