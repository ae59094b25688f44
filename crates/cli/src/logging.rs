//! Logging setup for `dgrid`.
//!
//! Everything goes to stderr so stdout stays clean for CSV/JSON output. The
//! engine crates log through the `log` facade; the subscriber's `tracing-log`
//! bridge picks those records up.
//!
//! - `-q`: errors only
//! - default: info (one summary line per command)
//! - `-v`: debug (per-stage counts from the engines)
//! - `-vv`: trace
//!
//! `RUST_LOG` overrides all of the above.

use std::io;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO, with_ansi: true }
    }
}

impl LogConfig {
    /// `quiet` wins over any number of `-v`.
    #[must_use]
    pub fn from_flags(verbosity: u8, quiet: bool) -> Self {
        let level = match (quiet, verbosity) {
            (true, _) => Level::ERROR,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        };
        Self { level, ..Default::default() }
    }

    #[must_use]
    pub fn with_ansi(mut self, enable: bool) -> Self {
        self.with_ansi = enable;
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.with_ansi)
        .with_target(false)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(build_env_filter(config.level))
        .with(layer)
        .try_init()
}

fn build_env_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_lowercase();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Dependencies stay at warn
        EnvFilter::new(format!(
            "warn,dgrid={level},deltagrid_recon={level},deltagrid_io={level}"
        ))
    })
}
