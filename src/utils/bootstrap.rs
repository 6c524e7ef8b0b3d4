//! Bootstrap utilities for reactobus binaries.
//!
//! Shared initialization code for the daemon and the command line tools.

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_ENV_VAR;

/// Log destination meaning standard output.
pub const STDOUT: &str = "-";

/// Initialize tracing.
///
/// The filter comes from `REACTOBUS_LOG` when set, otherwise from `level`
/// (case-insensitive, e.g. `INFO`). Events go to stdout when `log_file` is
/// `"-"`, else they are appended to that file.
pub fn init_tracing(level: &str, log_file: &str) -> io::Result<()> {
    let filter = env_filter(level);

    if log_file == STDOUT {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    }
    Ok(())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()))
}

/// Initialize tracing for short-lived tools, honoring `REACTOBUS_LOG` only.
pub fn init_cli_tracing() {
    tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
