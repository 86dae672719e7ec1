//! Tracing subscriber setup.
//!
//! The interactive shell owns the terminal, so it logs to a file; the
//! listing and headless modes log to stderr and keep stdout clean.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// `<data-local>/monolith-launcher/launcher.log`, or the working directory
/// when the platform has no data directory.
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monolith-launcher")
        .join("launcher.log")
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Log to `path`. If the file cannot be opened, logging is discarded.
pub fn init_file(path: &Path) {
    match open_log(path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_env_filter(filter())
                .with_ansi(false)
                .try_init();
        }
        Err(_) => {
            let _ = tracing_subscriber::fmt()
                .with_writer(std::io::sink)
                .with_env_filter(filter())
                .try_init();
        }
    }
}

pub fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter())
        .with_target(false)
        .try_init();
}
