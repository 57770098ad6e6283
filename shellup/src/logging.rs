//! Tracing subscriber setup for the `shellup` binary.
//!
//! Logs go to stderr and to a daily-rolling file in the log directory.
//! The filter comes from `SHELLUP_LOG` (same syntax as `RUST_LOG`); without
//! it the level is `warn`, or `debug` in verbose mode.

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{EngineError, EngineResult};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "SHELLUP_LOG";

/// Log file name prefix; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "shellup.log";

/// Filter used when `SHELLUP_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "shellup=debug,warn"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes the file
/// writer.
pub fn init_logging(verbose: bool, log_dir: &Path) -> EngineResult<WorkerGuard> {
    fs::create_dir_all(log_dir).map_err(|e| EngineError::io(log_dir, e))?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .map_err(|e| EngineError::Config(format!("cannot install log subscriber: {}", e)))?;

    Ok(guard)
}
