//! Dependency confirmation: search a source tree for evidence that each
//! scanned library is actually used.
//!
//! Matching is lexical. A literal that merely looks like a library name counts
//! as evidence, and names assembled at runtime are missed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::model::{AnalysisResult, Confidence, DependencyEvidence, ScanIssue};
use crate::patterns::{Language, MatchMode, PatternRegistry};
use crate::services::pool::{CancellationToken, WorkerPool};

/// Extensions stripped when reducing a library reference to its stem.
const LIBRARY_EXTENSIONS: [&str; 9] =
    ["dll", "ocx", "cpl", "drv", "sys", "exe", "lib", "so", "dylib"];

/// Import libraries stand in for the DLL they link against.
const IMPORT_LIBRARY_EXTENSION: &str = "lib";

/// Lowercase base name split into stem and known library extension.
fn split_library_name(raw: &str) -> (String, Option<String>) {
    let base = raw.trim().rsplit(['/', '\\']).next().unwrap_or_default().to_ascii_lowercase();
    if let Some((stem, ext)) = base.rsplit_once('.') {
        if !stem.is_empty() && LIBRARY_EXTENSIONS.contains(&ext) {
            return (stem.to_string(), Some(ext.to_string()));
        }
    }
    (base, None)
}

/// Lowercase base name without directories or a known library extension.
pub fn normalize_library_name(raw: &str) -> String {
    split_library_name(raw).0
}

/// Library being confirmed.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    stem: String,
    extension: Option<String>,
}

impl Candidate {
    fn new(name: &str) -> Self {
        let (stem, extension) = split_library_name(name);
        Self { name: name.to_string(), stem, extension }
    }

    /// Whether a name captured from source refers to this library. A captured
    /// name without an extension matches on stem alone; one with an extension
    /// must carry the same extension (or `.lib`).
    fn matches(&self, captured: &str, mode: MatchMode) -> bool {
        let (stem, extension) = split_library_name(captured);
        let extension_agrees = match extension.as_deref() {
            None | Some(IMPORT_LIBRARY_EXTENSION) => true,
            Some(ext) => self.extension.as_deref() == Some(ext),
        };
        let stem_agrees = match mode {
            MatchMode::Contains => !self.stem.is_empty() && stem.contains(&self.stem),
            _ => stem == self.stem,
        };
        extension_agrees && stem_agrees
    }
}

/// Bytes that continue a file name, so a literal hit must not touch them.
fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

/// Everything a confirmation pass produced.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationOutcome {
    pub results: BTreeMap<String, AnalysisResult>,
    pub errors: Vec<ScanIssue>,
    /// `false` when cancellation skipped some source files.
    pub complete: bool,
}

/// Confirmation engine over a shared, read-only pattern registry.
pub struct DependencyConfirmer<'a> {
    pub registry: &'a PatternRegistry,
    pub config: &'a ScanConfig,
}

impl<'a> DependencyConfirmer<'a> {
    pub fn new(registry: &'a PatternRegistry, config: &'a ScanConfig) -> Self {
        Self { registry, config }
    }

    /// Confirm every library in `libraries` against the tree at `source_root`.
    ///
    /// One result per distinct library name (case-insensitive, first spelling
    /// kept). Per-file read failures land in `errors`.
    pub fn confirm(
        &self,
        source_root: &Path,
        libraries: &[String],
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> ConfirmationOutcome {
        let mut candidates: Vec<Candidate> = Vec::new();
        for name in libraries {
            if !candidates.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                candidates.push(Candidate::new(name));
            }
        }

        let (files, mut errors) = self.source_files(source_root);
        let languages_scanned: BTreeSet<String> =
            files.iter().map(|(_, language)| language.name.clone()).collect();
        debug!(
            root = %source_root.display(),
            files = files.len(),
            libraries = candidates.len(),
            "confirming dependencies"
        );

        let literal = literal_matcher(&candidates);
        let per_file: Vec<Option<Result<Vec<DependencyEvidence>, ScanIssue>>> = pool.install(|| {
            files
                .par_iter()
                .map(|(path, language)| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.scan_file(path, language, &candidates, literal.as_ref()))
                })
                .collect()
        });

        let mut complete = true;
        let mut by_library: BTreeMap<String, Vec<DependencyEvidence>> = BTreeMap::new();
        for outcome in per_file {
            match outcome {
                None => complete = false,
                Some(Ok(evidence)) => {
                    for ev in evidence {
                        by_library.entry(ev.library_name.clone()).or_default().push(ev);
                    }
                }
                Some(Err(issue)) => {
                    warn!(path = %issue.path, error = %issue.message, "source file skipped");
                    errors.push(issue);
                }
            }
        }

        let results = candidates
            .iter()
            .map(|candidate| {
                let evidence = by_library.remove(&candidate.name).unwrap_or_default();
                let languages = languages_scanned.clone();
                let result = AnalysisResult::new(candidate.name.clone(), evidence, languages);
                (candidate.name.clone(), result)
            })
            .collect();
        ConfirmationOutcome { results, errors, complete }
    }

    /// Source files that map to a registered language.
    fn source_files(&self, root: &Path) -> (Vec<(PathBuf, &'a Language)>, Vec<ScanIssue>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();
        let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !self.config.is_excluded_dir(&entry.file_name().to_string_lossy())
        });
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let registry: &'a PatternRegistry = self.registry;
                    if let Some(language) = registry.language_for_path(entry.path()) {
                        files.push((entry.into_path(), language));
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let path = err.path().unwrap_or(root).display().to_string();
                    warn!(path = %path, error = %err, "source walk error");
                    errors.push(ScanIssue::new(path, err.to_string()));
                }
            }
        }
        (files, errors)
    }

    fn scan_file(
        &self,
        path: &Path,
        language: &Language,
        candidates: &[Candidate],
        literal: Option<&Regex>,
    ) -> Result<Vec<DependencyEvidence>, ScanIssue> {
        let source_file = path.display().to_string();
        let size =
            fs::metadata(path).map_err(|e| ScanIssue::new(&source_file, e.to_string()))?.len();
        if size > self.config.max_source_file_bytes {
            debug!(path = %source_file, size, "source file over size limit, skipped");
            return Ok(Vec::new());
        }
        let bytes = fs::read(path).map_err(|e| ScanIssue::new(&source_file, e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes);
        let lines = LineIndex::new(&text);

        // (candidate, line) -> strongest evidence
        let mut best: BTreeMap<(usize, usize), DependencyEvidence> = BTreeMap::new();
        let mut record = |candidate: usize, offset: usize, rule_id: &str, confidence: Confidence| {
            let line = lines.line_of(offset);
            let stronger = best
                .get(&(candidate, line))
                .map_or(true, |existing| existing.confidence < confidence);
            if stronger {
                let evidence = DependencyEvidence {
                    library_name: candidates[candidate].name.clone(),
                    source_file: source_file.clone(),
                    line_number: line,
                    matched_pattern_id: rule_id.to_string(),
                    language: language.name.clone(),
                    confidence,
                };
                best.insert((candidate, line), evidence);
            }
        };

        for rule in &language.rules {
            match (rule.mode, rule.regex()) {
                (MatchMode::Literal, _) => {
                    let Some(literal) = literal else { continue };
                    for caps in literal.captures_iter(&text) {
                        let Some(hit) = caps.get(1) else { continue };
                        if text.as_bytes().get(hit.end()).is_some_and(|b| is_name_byte(*b)) {
                            continue;
                        }
                        let found = hit.as_str();
                        for (index, candidate) in candidates.iter().enumerate() {
                            if candidate.name.eq_ignore_ascii_case(found) {
                                record(index, hit.start(), &rule.id, rule.confidence);
                            }
                        }
                    }
                }
                (mode, Some(regex)) => {
                    for caps in regex.captures_iter(&text) {
                        let (Some(whole), Some(arg)) = (caps.get(0), caps.get(1)) else {
                            continue;
                        };
                        for (index, candidate) in candidates.iter().enumerate() {
                            if candidate.matches(arg.as_str(), mode) {
                                record(index, whole.start(), &rule.id, rule.confidence);
                            }
                        }
                    }
                }
                (_, None) => {}
            }
        }
        Ok(best.into_values().collect())
    }
}

/// Case-insensitive alternation of every candidate file name, not preceded
/// by a file-name character. Group 1 is the name; the caller checks the
/// character after it.
fn literal_matcher(candidates: &[Candidate]) -> Option<Regex> {
    if candidates.is_empty() {
        return None;
    }
    let alternation =
        candidates.iter().map(|c| regex::escape(&c.name)).collect::<Vec<_>>().join("|");
    let pattern = format!(r"(?:^|[^A-Za-z0-9_.\-])({alternation})");
    match RegexBuilder::new(&pattern).case_insensitive(true).size_limit(64 << 20).build() {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(error = %err, "literal matcher disabled");
            None
        }
    }
}

/// Byte offset -> 1-based line number.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|start| *start <= offset)
    }
}
