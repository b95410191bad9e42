use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dllscan_core::config::ScanConfig;

/// Load the scan config from `path`, or the defaults when no path is given.
pub fn load_scan_config(path: Option<&str>) -> Result<ScanConfig> {
    match path {
        Some(path) => ScanConfig::load(Path::new(path))
            .with_context(|| format!("Failed to load scan config {}", path)),
        None => Ok(ScanConfig::default()),
    }
}

/// Write `body` to `output` when given, otherwise print it to stdout.
pub fn emit(body: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory {}", parent.display())
                })?;
            }
            fs::write(path, body)
                .with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            println!("{}", body.trim_end());
            Ok(())
        }
    }
}

/// Render a comma-separated list, or `-` when empty.
pub fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
