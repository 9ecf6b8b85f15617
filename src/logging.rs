//! Log setup for the agent process.
//!
//! stdout is the protocol transport, so the subscriber writes to
//! `~/.netconf-agent/agent.log` and falls back to stderr when that file
//! cannot be opened.

use crate::agent_paths;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)
}

/// Unparseable directives fall through to the next source, ending at `info`.
fn filter_from(rust_log: Option<&str>, level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns the log file path when logging
/// to a file.
///
/// Calling this twice is harmless; the second install is ignored.
pub fn init(level: &str) -> Option<PathBuf> {
    let log_file = agent_paths::agent_log_path().ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
            .map(|file| (path, file))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true);

    match log_file {
        Some((path, file)) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            Some(path)
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            None
        }
    }
}
