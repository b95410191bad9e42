use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use dllscan_core::backends::PeExtractor;
use dllscan_core::model::{DependencySummary, ScanReport, ScanSummary};
use dllscan_core::services::{ScanCoordinator, ScanRequest, WorkerPool};
use serde::Serialize;

use crate::commands::{emit, join_or_dash, load_scan_config, to_cyclonedx};
use crate::{canonicalize_or_current, infer_project_name, sha256_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Resolved `scan` arguments.
#[derive(Debug, Clone)]
pub struct ScanArgs {
    pub path: String,
    pub recursive: bool,
    pub workers: Option<usize>,
    pub source: Option<String>,
    pub confirm: bool,
    pub config: Option<String>,
    pub format: OutputFormat,
    pub output: Option<String>,
    pub cyclonedx: Option<String>,
    pub project_name: Option<String>,
    pub project_version: String,
}

/// JSON report: the scan itself plus the derived statistics.
#[derive(Debug, Serialize)]
pub struct ReportDocument<'a> {
    #[serde(flatten)]
    pub report: &'a ScanReport,
    pub summary: ScanSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_summary: Option<DependencySummary>,
}

impl<'a> ReportDocument<'a> {
    pub fn new(report: &'a ScanReport) -> Self {
        Self { report, summary: report.summary(), dependency_summary: report.dependency_summary() }
    }
}

/// Scan a tree, print or write the report, and optionally export an SBOM.
pub fn scan_command(args: &ScanArgs) -> Result<()> {
    let mut config = load_scan_config(args.config.as_deref())?;
    // Flags win over the config file.
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    let recursive = args.recursive && config.recursive;

    let root = canonicalize_or_current(&args.path)?;
    let source = match (&args.source, args.confirm) {
        (Some(source), _) => Some(canonicalize_or_current(source)?),
        (None, true) => Some(root.clone()),
        (None, false) => None,
    };

    let report = run_scan(&config, &root, recursive, source.as_deref())?;

    let body = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&ReportDocument::new(&report))
            .context("Failed to serialize scan report to JSON")?,
        OutputFormat::Text => render_text(&report),
    };
    let output = args.output.as_deref().map(Path::new);
    emit(&body, output)?;
    if let Some(path) = output {
        eprintln!("Report written to {}", path.display());
    }

    if let Some(bom_path) = args.cyclonedx.as_deref().map(PathBuf::from) {
        let project_name = args.project_name.clone().unwrap_or_else(|| infer_project_name(&root));
        let bom = to_cyclonedx(&report, &project_name, &args.project_version);
        let serialized =
            serde_json::to_string_pretty(&bom).context("Failed to serialize CycloneDX SBOM")?;
        emit(&serialized, Some(&bom_path))?;
        let digest = sha256_file(&bom_path)?;
        eprintln!(
            "CycloneDX SBOM written to {} ({} components, sha256 {})",
            bom_path.display(),
            bom.components.len(),
            digest
        );
    }

    Ok(())
}

/// Build the pool and registry from `config` and run one scan.
pub fn run_scan(
    config: &dllscan_core::config::ScanConfig,
    root: &Path,
    recursive: bool,
    source: Option<&Path>,
) -> Result<ScanReport> {
    let registry = config.registry().context("Invalid extra_patterns in scan config")?;
    let extractor = PeExtractor::new().with_hashing(config.hash_files);
    let pool = WorkerPool::new(config.workers.unwrap_or(0))
        .context("Failed to start scan worker pool")?;
    let coordinator =
        ScanCoordinator { extractor: &extractor, registry: &registry, config, pool: &pool };

    let mut request = ScanRequest::new(root).recursive(recursive);
    if let Some(source) = source {
        request = request.with_source(source);
    }
    coordinator.scan(&request).with_context(|| format!("Failed to scan {}", root.display()))
}

/// Human-readable report.
pub fn render_text(report: &ScanReport) -> String {
    let mut out = String::new();
    let summary = report.summary();

    writeln!(out, "Scan: {}", report.scan_path).ok();
    writeln!(out, "- Recursive: {}", report.recursive).ok();
    writeln!(out, "- Files scanned: {}", report.total_files_scanned).ok();
    writeln!(out, "- DLLs found: {}", report.total_dlls_found).ok();
    writeln!(out, "- Duration: {:.3}s", report.scan_duration_seconds).ok();
    if !report.complete {
        writeln!(out, "- Incomplete: the scan was cancelled before all files were processed")
            .ok();
    }

    writeln!(out, "DLLs ({}):", report.dll_files.len()).ok();
    if report.dll_files.is_empty() {
        writeln!(out, "  (none)").ok();
    }
    for binary in &report.dll_files {
        writeln!(
            out,
            "  - {} [arch: {}] version={} company={} signed={}",
            binary.file_name,
            binary.architecture,
            binary.file_version(),
            binary.company_name(),
            if binary.is_signed { "yes" } else { "no" }
        )
        .ok();
        writeln!(out, "      path: {}", binary.file_path).ok();
        writeln!(out, "      imports: {}", join_or_dash(&binary.imported_libraries)).ok();
        writeln!(out, "      exports: {}", binary.exported_functions.len()).ok();
        for issue in &binary.parse_errors {
            writeln!(out, "      parse error: {}", issue.message).ok();
        }
    }

    writeln!(out, "Summary:").ok();
    for (arch, count) in &summary.architectures {
        writeln!(out, "  - {arch}: {count}").ok();
    }
    writeln!(out, "  - signed: {}", summary.signed_dlls).ok();
    writeln!(out, "  - unsigned: {}", summary.unsigned_dlls).ok();
    writeln!(out, "  - with parse errors: {}", summary.dlls_with_parse_errors).ok();

    if !report.errors.is_empty() {
        writeln!(out, "Errors ({}):", report.errors.len()).ok();
        for issue in &report.errors {
            writeln!(out, "  - {}: {}", issue.path, issue.message).ok();
        }
    }

    let dependencies = report.dependency_analysis.as_ref().zip(report.dependency_summary());
    if let Some((analysis, deps)) = dependencies {
        let source = report.source_path.as_deref().unwrap_or("-");
        writeln!(out, "Dependency analysis (source: {source}):").ok();
        writeln!(
            out,
            "- Confirmed: {} of {} libraries",
            deps.libraries_confirmed, deps.libraries_analyzed
        )
        .ok();
        let by_confidence: Vec<String> = deps
            .evidence_by_confidence
            .iter()
            .map(|(confidence, count)| format!("{confidence}={count}"))
            .collect();
        writeln!(out, "- Evidence: {}", join_or_dash(&by_confidence)).ok();
        for result in analysis.values() {
            let strongest = result.max_confidence().map(|c| c.as_str()).unwrap_or("-");
            writeln!(
                out,
                "  - {}: {} ({} evidence, max {})",
                result.library_name,
                if result.confirmed { "confirmed" } else { "not confirmed" },
                result.evidence.len(),
                strongest
            )
            .ok();
            for evidence in &result.evidence {
                writeln!(
                    out,
                    "      {}:{} [{} {}]",
                    evidence.source_file,
                    evidence.line_number,
                    evidence.matched_pattern_id,
                    evidence.confidence.as_str()
                )
                .ok();
            }
        }
        writeln!(out, "Potentially unused ({}):", deps.potentially_unused.len()).ok();
        for library in &deps.potentially_unused {
            writeln!(out, "  - {library}").ok();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_report() -> ScanReport {
        ScanReport {
            scan_path: "/bins".to_string(),
            recursive: false,
            total_files_scanned: 0,
            total_dlls_found: 0,
            scan_duration_seconds: 0.0,
            complete: false,
            errors: Vec::new(),
            dll_files: Vec::new(),
            source_path: None,
            dependency_analysis: None,
        }
    }

    #[test]
    fn text_report_marks_incomplete_scans() {
        let text = render_text(&empty_report());
        assert!(text.contains("DLLs (0):"));
        assert!(text.contains("(none)"));
        assert!(text.contains("Incomplete"));
        assert!(!text.contains("Dependency analysis"));
    }

    #[test]
    fn json_document_adds_summary_without_dependency_block() {
        let report = empty_report();
        let value = serde_json::to_value(ReportDocument::new(&report)).unwrap();
        assert_eq!(value["total_dlls_found"], 0);
        assert_eq!(value["summary"]["total_dlls"], 0);
        assert!(value["dependency_analysis"].is_null());
        assert!(value.get("dependency_summary").is_none());
    }
}
