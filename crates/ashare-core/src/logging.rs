//! `tracing` subscriber initialization, following this codebase's
//! `init_process_start`-style one-shot startup hook.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Output format for the `tracing-subscriber` formatter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initialize the global `tracing` subscriber exactly once. Safe to call
/// from multiple entry points (CLI, tests); subsequent calls are no-ops.
/// `RUST_LOG` always takes precedence over `default_level`.
pub fn init(format: LogFormat, default_level: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match format {
            LogFormat::Text => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
    });
}
