//! Logging setup
//!
//! Console mode writes `tracing` events to stderr. File mode appends them to
//! `<data_dir>/flowplan/flowplan.log` with a session marker per process.

use chrono::Local;
use lazy_static::lazy_static;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

lazy_static! {
    static ref LOG_FILE: Mutex<Option<Arc<File>>> = Mutex::new(None);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Console,
    File,
}

/// Default directives, overridden by FLOWPLAN_LOG or RUST_LOG
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "flowplan=debug,info"
    } else {
        "flowplan=info,warn"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env("FLOWPLAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Install the global subscriber. Calling it twice is an error.
pub fn init_logging(target: LogTarget, verbose: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(verbose));

    match target {
        LogTarget::Console => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init()?;
        }
        LogTarget::File => {
            let file = open_log_file()?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file),
                )
                .try_init()?;
        }
    }
    Ok(())
}

fn open_log_file() -> anyhow::Result<Arc<File>> {
    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "\n=== flowplan session started at {} ===\n", timestamp)?;

    let file = Arc::new(file);
    *LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner) = Some(file.clone());
    Ok(file)
}

/// Flush the log file, if one is open
pub fn flush() {
    let guard = LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(file) = guard.as_ref() {
        let _ = (&**file).flush();
    }
}

fn get_log_path() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("flowplan").join("flowplan.log")
    } else {
        PathBuf::from("flowplan.log")
    }
}

/// Get the current log file path for display
pub fn get_log_path_display() -> String {
    get_log_path().display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives(false), "flowplan=info,warn");
        assert!(default_directives(true).starts_with("flowplan=debug"));
    }

    #[test]
    fn test_log_path_ends_with_file_name() {
        assert!(get_log_path_display().ends_with("flowplan.log"));
    }
}
