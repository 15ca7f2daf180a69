//! Tracing subscriber setup for the command line

use std::io::{self, IsTerminal};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};
use crate::training::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. `verbosity` raises the level
/// by one step per count and `quiet` limits output to errors.
pub fn init_logging(config: &LoggingConfig, verbosity: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else {
        match verbosity {
            0 => config.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("gentrain={level},warn")))
        .map_err(|e| Error::config(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry();
    let result = if config.json {
        // JSON output for machine parsing
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        registry.with(json_layer).try_init()
    } else if io::stdout().is_terminal() {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_filter(env_filter);
        registry.with(fmt_layer).try_init()
    } else {
        // Plain output for pipes and files
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_filter(env_filter);
        registry.with(fmt_layer).try_init()
    };
    result.map_err(|e| Error::internal(format!("logging already initialised: {e}")))
}
