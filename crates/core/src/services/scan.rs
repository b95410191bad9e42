use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::pool::{CancellationToken, WorkerPool};
use crate::analysis::DependencyConfirmer;
use crate::backends::MetadataExtractor;
use crate::config::ScanConfig;
use crate::model::{ScanIssue, ScanReport};
use crate::patterns::PatternRegistry;

/// Fatal scan failures. Everything per-file is reported inside the `ScanReport`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scan path not found: {}", .0.display())]
    PathNotFound(PathBuf),
    #[error("Source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Source path is not a directory: {}", .0.display())]
    SourceNotADirectory(PathBuf),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// What to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Directory to walk, or a single file to inspect.
    pub root: PathBuf,
    pub recursive: bool,
    /// Source tree for dependency confirmation; confirmation runs only when set.
    pub source: Option<PathBuf>,
}

impl ScanRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), recursive: true, source: None }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Files found by the walk.
#[derive(Debug, Default)]
struct Enumeration {
    candidates: Vec<PathBuf>,
    files_visited: usize,
    errors: Vec<ScanIssue>,
}

/// Ties the extractor, the pattern registry and a caller-owned pool together.
pub struct ScanCoordinator<'a> {
    pub extractor: &'a dyn MetadataExtractor,
    pub registry: &'a PatternRegistry,
    pub config: &'a ScanConfig,
    pub pool: &'a WorkerPool,
}

impl<'a> ScanCoordinator<'a> {
    pub fn scan(&self, request: &ScanRequest) -> Result<ScanReport, ScanError> {
        self.scan_with_cancel(request, &CancellationToken::new())
    }

    /// Run a scan that stops dispatching new work once `cancel` fires.
    pub fn scan_with_cancel(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        if !request.root.exists() {
            return Err(ScanError::PathNotFound(request.root.clone()));
        }
        if let Some(source) = &request.source {
            if !source.exists() {
                return Err(ScanError::SourceNotFound(source.clone()));
            }
            if !source.is_dir() {
                return Err(ScanError::SourceNotADirectory(source.clone()));
            }
        }

        info!(
            root = %request.root.display(),
            recursive = request.recursive,
            workers = self.pool.workers(),
            extractor = self.extractor.name(),
            "scan started"
        );
        let started = Instant::now();
        let walk = self.enumerate(&request.root, request.recursive);
        let mut errors = walk.errors;

        let extractor = self.extractor;
        let outcomes: Vec<_> = self.pool.install(|| {
            walk.candidates
                .par_iter()
                .map(|path| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(extractor.extract(path).map_err(|err| (path, err)))
                })
                .collect()
        });

        let mut complete = true;
        let mut dll_files = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                None => complete = false,
                Some(Ok(record)) => dll_files.push(record),
                Some(Err((path, err))) => {
                    warn!(path = %path.display(), error = %err, "file skipped");
                    errors.push(ScanIssue::new(path.display().to_string(), err.to_string()));
                }
            }
        }

        let dependency_analysis = match &request.source {
            Some(source) => {
                let libraries: Vec<String> =
                    dll_files.iter().map(|d| d.file_name.clone()).collect();
                let confirmer = DependencyConfirmer::new(self.registry, self.config);
                let outcome = confirmer.confirm(source, &libraries, self.pool, cancel);
                errors.extend(outcome.errors);
                complete &= outcome.complete;
                Some(outcome.results)
            }
            None => None,
        };

        let report = ScanReport {
            scan_path: request.root.display().to_string(),
            recursive: request.recursive,
            total_files_scanned: walk.files_visited,
            total_dlls_found: dll_files.len(),
            scan_duration_seconds: started.elapsed().as_secs_f64(),
            complete,
            errors,
            dll_files,
            source_path: request.source.as_ref().map(|s| s.display().to_string()),
            dependency_analysis,
        };
        info!(
            files = report.total_files_scanned,
            dlls = report.total_dlls_found,
            errors = report.errors.len(),
            complete = report.complete,
            seconds = report.scan_duration_seconds,
            "scan finished"
        );
        Ok(report)
    }

    fn enumerate(&self, root: &Path, recursive: bool) -> Enumeration {
        if root.is_file() {
            return Enumeration {
                candidates: vec![root.to_path_buf()],
                files_visited: 1,
                errors: Vec::new(),
            };
        }
        let mut walker = WalkDir::new(root).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut walk = Enumeration::default();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    walk.files_visited += 1;
                    if self.config.is_candidate(entry.path()) {
                        debug!(path = %entry.path().display(), "candidate binary");
                        walk.candidates.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let path = err.path().unwrap_or(root).display().to_string();
                    warn!(path = %path, error = %err, "walk error");
                    walk.errors.push(ScanIssue::new(path, err.to_string()));
                }
            }
        }
        walk
    }
}
