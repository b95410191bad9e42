use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patterns::{PatternError, PatternRegistry, PatternRuleSpec};

pub const DEFAULT_EXTENSIONS: [&str; 4] = ["dll", "ocx", "cpl", "drv"];
pub const DEFAULT_EXCLUDE_DIRS: [&str; 4] = [".git", ".hg", ".svn", "node_modules"];
pub const DEFAULT_MAX_SOURCE_FILE_BYTES: u64 = 8 * 1024 * 1024;

/// Scan settings, loadable from YAML or JSON.
///
/// Every field has a default so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Binary-image extensions to pick up, without the dot.
    pub extensions: Vec<String>,
    pub recursive: bool,
    /// Worker threads; `None` means available parallelism.
    pub workers: Option<usize>,
    /// Directory names skipped while walking the source tree.
    pub exclude_dirs: Vec<String>,
    /// Source files larger than this are skipped.
    pub max_source_file_bytes: u64,
    /// Compute a SHA-256 of every binary.
    pub hash_files: bool,
    /// Extra confirmation rules merged into the built-in registry.
    pub extra_patterns: Vec<PatternRuleSpec>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            recursive: true,
            workers: None,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect(),
            max_source_file_bytes: DEFAULT_MAX_SOURCE_FILE_BYTES,
            hash_files: true,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config JSON at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to parse config YAML at {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ScanConfig {
    /// Load from disk; `.json` files parse as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_slice(&bytes)
                .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })
        } else {
            serde_yaml::from_slice(&bytes)
                .map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
        }
    }

    /// True when `path` carries one of the configured binary extensions.
    pub fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }

    /// Built-in rules plus `extra_patterns`.
    pub fn registry(&self) -> Result<PatternRegistry, PatternError> {
        PatternRegistry::with_extra(&self.extra_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_common_binary_extensions() {
        let config = ScanConfig::default();
        assert!(config.is_candidate(Path::new("a/b/TEST.DLL")));
        assert!(config.is_candidate(Path::new("control.cpl")));
        assert!(!config.is_candidate(Path::new("notes.txt")));
        assert!(!config.is_candidate(Path::new("dll")));
        assert!(config.is_excluded_dir("node_modules"));
        assert!(config.recursive);
    }

    #[test]
    fn loads_partial_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("scan.yaml");
        std::fs::write(
            &yaml,
            "extensions: [dll, exe]\nworkers: 2\nextra_patterns:\n  - id: c.my_load\n    language: c\n    regex: 'MyLoad\\(\"([^\"]+)\"\\)'\n    confidence: Medium\n",
        )
        .unwrap();
        let config = ScanConfig::load(&yaml).unwrap();
        assert_eq!(config.extensions, vec!["dll", "exe"]);
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.max_source_file_bytes, DEFAULT_MAX_SOURCE_FILE_BYTES);
        assert_eq!(config.extra_patterns.len(), 1);
        assert!(config.registry().unwrap().rules().any(|r| r.id == "c.my_load"));

        let json = dir.path().join("scan.json");
        std::fs::write(&json, r#"{"recursive": false, "hash_files": false}"#).unwrap();
        let config = ScanConfig::load(&json).unwrap();
        assert!(!config.recursive);
        assert!(!config.hash_files);
        assert_eq!(config.extensions.len(), DEFAULT_EXTENSIONS.len());
    }

    #[test]
    fn reports_unreadable_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ScanConfig::load(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(matches!(ScanConfig::load(&bad), Err(ConfigError::Json { .. })));
    }
}
