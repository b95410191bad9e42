//! Log subscriber setup.
//!
//! Stderr gets everything at the `-v` level. Version-extraction records are
//! also appended, at debug level, to `dll_version_extraction.log` so a failed
//! version lookup can be diagnosed after the fact.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use dllscan_core::backends::version;
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn, Level};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Overrides the directory holding the version-extraction log.
pub const LOG_DIR_ENV: &str = "DLLSCAN_LOG_DIR";
pub const VERSION_LOG_FILE: &str = "dll_version_extraction.log";

/// `$DLLSCAN_LOG_DIR`, else `~/.dll-scanner/logs`.
pub fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")).map_or_else(
        || std::env::temp_dir().join("dll-scanner").join("logs"),
        |home| PathBuf::from(home).join(".dll-scanner").join("logs"),
    )
}

/// Create `dir` if needed and open the version log in append mode.
pub fn open_version_log(dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(VERSION_LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok((path, file))
}

fn stderr_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber. `RUST_LOG` is not consulted, `-v` decides.
///
/// A log file that cannot be opened only disables the file layer.
pub fn init_tracing(verbose: u8, json: bool) {
    let stderr = fmt::layer().with_target(true).with_writer(io::stderr);
    let stderr = if json { stderr.json().boxed() } else { stderr.boxed() };

    let (file_layer, opened) = match open_version_log(&log_dir()) {
        Ok((path, file)) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .with_filter(Targets::new().with_target(version::LOG_TARGET, Level::DEBUG));
            (Some(layer), Ok(path))
        }
        Err(err) => (None, Err(err)),
    };

    tracing_subscriber::registry()
        .with(stderr.with_filter(stderr_level(verbose)))
        .with(file_layer)
        .init();

    match opened {
        Ok(path) => debug!(path = %path.display(), "version extraction log enabled"),
        Err(err) => warn!(error = %format!("{err:#}"), "version extraction log disabled"),
    }
}
