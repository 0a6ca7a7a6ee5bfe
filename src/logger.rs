//! Logging bootstrap for embedders.
//!
//! The crate itself only emits `tracing` events; installing a subscriber
//! is the embedder's call. This helper mirrors the usual setup: a stderr
//! fmt layer filtered by `RUST_LOG`, plus an optional daily-rolling file
//! layer.

use std::path::PathBuf;
use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::daily;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fallback level when `RUST_LOG` is unset.
    pub level: LevelFilter,
    /// Directory for the rolling `extbus.log`; `None` disables the file
    /// layer.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            dir: None,
        }
    }
}

/// Install the global tracing subscriber. Later calls are no-ops, so any
/// entry point may call this unconditionally.
pub fn init_logging(config: &LogConfig) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(config.level.into())
            .from_env_lossy();

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        let file_layer = config.dir.as_ref().map(|dir| {
            // best-effort; the stderr layer still works without the file
            std::fs::create_dir_all(dir).ok();
            fmt::layer()
                .with_ansi(false)
                .with_writer(daily(dir, "extbus.log"))
        });

        let subscriber = Registry::default()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer);

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("logging setup skipped: a global subscriber is already installed");
        }
    });
}
