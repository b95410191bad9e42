//! Core data model for scanned binaries, dependency evidence, and scan reports.
//!
//! Everything here is plain data: records are produced by the extractor, the
//! confirmation engine, or the scan coordinator and handed read-only to
//! exporters. JSON field names are part of the external report contract.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Display sentinel for metadata that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// CPU architecture resolved from the image's COFF machine field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x64")]
    X64,
    #[serde(rename = "ARM")]
    Arm,
    #[serde(rename = "ARM64")]
    Arm64,
    Unknown,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X64 => "x64",
            Architecture::Arm => "ARM",
            Architecture::Arm64 => "ARM64",
            Architecture::Unknown => UNKNOWN,
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a non-fatal problem met while parsing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseIssueKind {
    /// Container markers missing; the file is not a PE image.
    NotABinaryImage,
    /// Headers present but inconsistent (e.g. no optional header).
    MalformedHeader,
    /// An import/export/section table is present but cut short.
    TruncatedTable,
    /// The version resource exists but could not be decoded.
    MalformedResource,
}

/// Non-fatal issue recorded on a `BinaryMetadata` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub kind: ParseIssueKind,
    pub message: String,
}

impl ParseIssue {
    pub fn new(kind: ParseIssueKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Human-readable strings from the version resource.
///
/// `None` means the value was absent; renderers show it as [`UNKNOWN`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub file_version: Option<String>,
    pub product_version: Option<String>,
    pub company_name: Option<String>,
    pub file_description: Option<String>,
    pub original_filename: Option<String>,
    pub legal_copyright: Option<String>,
    pub product_name: Option<String>,
    pub internal_name: Option<String>,
    /// String-table key (`LLLLCCCC`, language + codepage) the values came from.
    pub translation_used: Option<String>,
}

/// Metadata for one scanned binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMetadata {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub architecture: Architecture,
    /// Raw COFF machine value; kept even when `architecture` is `Unknown`.
    pub machine_type: Option<u16>,
    pub timestamp: Option<u32>,
    pub subsystem: Option<String>,
    #[serde(default)]
    pub dll_characteristics: Vec<String>,
    pub checksum: Option<u32>,
    pub is_signed: bool,
    #[serde(flatten)]
    pub version: VersionInfo,
    /// Libraries named by the import table, in table order, without duplicates.
    #[serde(rename = "imported_dlls")]
    pub imported_libraries: Vec<String>,
    pub exported_functions: Vec<String>,
    #[serde(default)]
    pub parse_errors: Vec<ParseIssue>,
}

impl BinaryMetadata {
    /// Record with every optional field unknown, used when nothing could be parsed.
    pub fn unparsed(identity: FileIdentity, issue: ParseIssue) -> Self {
        let mut record = Self::empty(identity);
        record.parse_errors.push(issue);
        record
    }

    pub(crate) fn empty(identity: FileIdentity) -> Self {
        Self {
            file_name: identity.file_name,
            file_path: identity.file_path,
            file_size: identity.file_size,
            sha256: identity.sha256,
            architecture: Architecture::Unknown,
            machine_type: None,
            timestamp: None,
            subsystem: None,
            dll_characteristics: Vec::new(),
            checksum: None,
            is_signed: false,
            version: VersionInfo::default(),
            imported_libraries: Vec::new(),
            exported_functions: Vec::new(),
            parse_errors: Vec::new(),
        }
    }

    pub fn company_name(&self) -> &str {
        or_unknown(&self.version.company_name)
    }

    pub fn file_version(&self) -> &str {
        or_unknown(&self.version.file_version)
    }

    pub fn product_version(&self) -> &str {
        or_unknown(&self.version.product_version)
    }

    pub fn file_description(&self) -> &str {
        or_unknown(&self.version.file_description)
    }
}

/// Value or the [`UNKNOWN`] sentinel.
pub fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or(UNKNOWN)
}

/// File-level identity gathered before any parsing happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub sha256: Option<String>,
}

/// Qualitative strength of one piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "Low",
            Confidence::Medium => "Medium",
            Confidence::High => "High",
        }
    }
}

/// A single source location that references a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEvidence {
    pub library_name: String,
    pub source_file: String,
    /// 1-based line of the match start.
    pub line_number: usize,
    pub matched_pattern_id: String,
    pub language: String,
    pub confidence: Confidence,
}

/// Confirmation outcome for one requested library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub library_name: String,
    pub confirmed: bool,
    pub evidence: Vec<DependencyEvidence>,
    /// Languages actually present in the scanned source tree.
    pub languages_scanned: BTreeSet<String>,
}

impl AnalysisResult {
    pub fn new(
        library_name: impl Into<String>,
        evidence: Vec<DependencyEvidence>,
        languages_scanned: BTreeSet<String>,
    ) -> Self {
        Self {
            library_name: library_name.into(),
            confirmed: !evidence.is_empty(),
            evidence,
            languages_scanned,
        }
    }

    /// Strongest confidence among the evidence, if any.
    pub fn max_confidence(&self) -> Option<Confidence> {
        self.evidence.iter().map(|e| e.confidence).max()
    }
}

/// Report-level error that is not tied to a parsed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

impl ScanIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

/// Root aggregate handed to exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_path: String,
    pub recursive: bool,
    pub total_files_scanned: usize,
    pub total_dlls_found: usize,
    pub scan_duration_seconds: f64,
    /// `false` when the scan was cancelled before every unit ran.
    pub complete: bool,
    pub errors: Vec<ScanIssue>,
    pub dll_files: Vec<BinaryMetadata>,
    pub source_path: Option<String>,
    /// `None` when confirmation was not requested.
    pub dependency_analysis: Option<BTreeMap<String, AnalysisResult>>,
}

impl ScanReport {
    /// Confirmation result for a binary, matched on file name case-insensitively.
    pub fn analysis_for(&self, binary: &BinaryMetadata) -> Option<&AnalysisResult> {
        let analysis = self.dependency_analysis.as_ref()?;
        analysis.get(&binary.file_name).or_else(|| {
            analysis.values().find(|r| r.library_name.eq_ignore_ascii_case(&binary.file_name))
        })
    }

    pub fn summary(&self) -> ScanSummary {
        let mut architectures = BTreeMap::new();
        for dll in &self.dll_files {
            *architectures.entry(dll.architecture.as_str().to_string()).or_insert(0) += 1;
        }
        let signed_dlls = self.dll_files.iter().filter(|d| d.is_signed).count();
        ScanSummary {
            total_dlls: self.dll_files.len(),
            architectures,
            signed_dlls,
            unsigned_dlls: self.dll_files.len() - signed_dlls,
            dlls_with_parse_errors: self
                .dll_files
                .iter()
                .filter(|d| !d.parse_errors.is_empty())
                .count(),
        }
    }

    /// Roll-up of the confirmation results; `None` when confirmation never ran.
    pub fn dependency_summary(&self) -> Option<DependencySummary> {
        let analysis = self.dependency_analysis.as_ref()?;
        let mut evidence_by_confidence = BTreeMap::new();
        for result in analysis.values() {
            for ev in &result.evidence {
                let key = ev.confidence.as_str().to_string();
                *evidence_by_confidence.entry(key).or_insert(0) += 1;
            }
        }
        Some(DependencySummary {
            libraries_analyzed: analysis.len(),
            libraries_confirmed: analysis.values().filter(|r| r.confirmed).count(),
            potentially_unused: analysis
                .values()
                .filter(|r| !r.confirmed)
                .map(|r| r.library_name.clone())
                .collect(),
            evidence_by_confidence,
        })
    }
}

/// Inventory statistics over the scanned binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_dlls: usize,
    pub architectures: BTreeMap<String, usize>,
    pub signed_dlls: usize,
    pub unsigned_dlls: usize,
    pub dlls_with_parse_errors: usize,
}

/// Usage statistics over the confirmation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySummary {
    pub libraries_analyzed: usize,
    pub libraries_confirmed: usize,
    pub potentially_unused: Vec<String>,
    pub evidence_by_confidence: BTreeMap<String, usize>,
}
