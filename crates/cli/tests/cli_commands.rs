use std::fs;

use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn scan_json(args: &[&str]) -> Value {
    let output = assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .args(args)
        .arg("--format")
        .arg("json")
        .output()
        .expect("run dllscan");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("stdout is a JSON report")
}

/// Smallest image the extractor accepts: DOS stub, PE signature, x64 COFF
/// header and a PE32 optional header with no sections or directories.
fn minimal_pe() -> Vec<u8> {
    let mut image = vec![0u8; 0x200];
    image[0..2].copy_from_slice(b"MZ");
    image[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    image[0x80..0x84].copy_from_slice(b"PE\0\0");
    image[0x84..0x86].copy_from_slice(&0x8664u16.to_le_bytes());
    image[0x94..0x96].copy_from_slice(&224u16.to_le_bytes());
    image[0x96..0x98].copy_from_slice(&0x2022u16.to_le_bytes());
    image[0x98..0x9a].copy_from_slice(&0x010bu16.to_le_bytes());
    image[0xf4..0xf8].copy_from_slice(&16u32.to_le_bytes());
    image
}

/// Scanning an empty directory succeeds with an empty, error-free report.
#[test]
fn scan_empty_directory_reports_nothing() {
    let dir = tempdir().expect("tempdir");
    let report = scan_json(&[dir.path().to_str().unwrap()]);

    assert_eq!(report["total_dlls_found"], 0);
    assert_eq!(report["dll_files"].as_array().unwrap().len(), 0);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);
    assert!(report["dependency_analysis"].is_null());
    assert_eq!(report["summary"]["total_dlls"], 0);
}

/// A placeholder DLL shows up as one record with unknown architecture and a parse error.
#[test]
fn scan_placeholder_dll_reports_unknown_record() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("test.dll"), b"fake dll content").unwrap();

    let report = scan_json(&[dir.path().to_str().unwrap()]);
    assert_eq!(report["total_dlls_found"], 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);

    let record = &report["dll_files"][0];
    assert_eq!(record["file_name"], "test.dll");
    assert_eq!(record["architecture"], "Unknown");
    assert_eq!(record["is_signed"], false);
    assert!(record["imported_dlls"].as_array().unwrap().is_empty());
    assert!(!record["parse_errors"].as_array().unwrap().is_empty());
    assert_eq!(report["summary"]["dlls_with_parse_errors"], 1);
}

/// A missing scan path fails before any scan starts.
#[test]
fn scan_fails_for_missing_path() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("does-not-exist");

    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Scan path not found"));
}

/// `--source` runs confirmation and reports evidence per library.
#[test]
fn scan_with_source_confirms_referenced_library() {
    let bins = tempdir().expect("tempdir");
    let src = tempdir().expect("tempdir");
    fs::write(bins.path().join("test.dll"), b"fake").unwrap();
    fs::write(bins.path().join("other.dll"), b"fake").unwrap();
    fs::write(
        src.path().join("loader.cpp"),
        "void init() {\n    auto h = LoadLibraryW(L\"test.dll\");\n}\n",
    )
    .unwrap();

    let report = scan_json(&[
        bins.path().to_str().unwrap(),
        "--source",
        src.path().to_str().unwrap(),
    ]);
    let analysis = &report["dependency_analysis"];
    assert_eq!(analysis["test.dll"]["confirmed"], true);
    assert_eq!(analysis["test.dll"]["evidence"][0]["confidence"], "High");
    assert_eq!(analysis["test.dll"]["evidence"][0]["line_number"], 2);
    assert_eq!(analysis["other.dll"]["confirmed"], false);
    assert_eq!(report["dependency_summary"]["libraries_confirmed"], 1);
    assert_eq!(report["dependency_summary"]["potentially_unused"][0], "other.dll");
}

/// `--confirm` without `--source` searches the scanned tree itself.
#[test]
fn confirm_flag_defaults_source_to_scan_root() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("native.dll"), b"fake").unwrap();
    let interop = "[DllImport(\"native.dll\")]\nstatic extern int F();\n";
    fs::write(dir.path().join("interop.cs"), interop).unwrap();

    let report = scan_json(&[dir.path().to_str().unwrap(), "--confirm"]);
    assert!(report["source_path"].is_string());
    assert_eq!(report["dependency_analysis"]["native.dll"]["confirmed"], true);
    assert_eq!(
        report["dependency_analysis"]["native.dll"]["evidence"][0]["confidence"],
        "Medium"
    );
}

/// Text output lists each binary and the summary block.
#[test]
fn scan_text_output_lists_binaries() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alpha.dll"), b"fake").unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("DLLs (1):"))
        .stdout(predicate::str::contains("alpha.dll [arch: Unknown]"))
        .stdout(predicate::str::contains("Summary:"));
}

/// `--output` writes the report to disk and keeps stdout empty.
#[test]
fn scan_output_flag_writes_report_file() {
    let dir = tempdir().expect("tempdir");
    let bins = dir.path().join("bins");
    fs::create_dir(&bins).unwrap();
    fs::write(bins.join("a.dll"), b"fake").unwrap();
    let out = dir.path().join("reports/scan.json");

    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .arg(&bins)
        .arg("--format")
        .arg("json")
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Report written to"));

    let report: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["total_dlls_found"], 1);
}

/// `--cyclonedx` writes a CycloneDX 1.6 document with one component per DLL.
#[test]
fn scan_writes_cyclonedx_sbom() {
    let dir = tempdir().expect("tempdir");
    let bins = dir.path().join("bins");
    fs::create_dir(&bins).unwrap();
    fs::write(bins.join("test.dll"), b"fake dll content").unwrap();
    let bom_path = dir.path().join("bom.json");

    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .arg(&bins)
        .arg("--cyclonedx")
        .arg(&bom_path)
        .arg("--project-name")
        .arg("Demo")
        .arg("--project-version")
        .arg("3.1.0")
        .assert()
        .success()
        .stderr(predicate::str::contains("CycloneDX SBOM written to"));

    let bom: Value = serde_json::from_str(&fs::read_to_string(&bom_path).unwrap()).unwrap();
    assert_eq!(bom["bomFormat"], "CycloneDX");
    assert_eq!(bom["specVersion"], "1.6");
    assert_eq!(bom["metadata"]["component"]["name"], "Demo");
    assert_eq!(bom["metadata"]["component"]["version"], "3.1.0");
    let components = bom["components"].as_array().unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0]["bom-ref"], "pkg:dll/test.dll@unknown?arch=unknown");
    assert_eq!(components[0]["hashes"][0]["alg"], "SHA-256");
}

/// A config file can widen the extension list.
#[test]
fn scan_honours_config_file() {
    let dir = tempdir().expect("tempdir");
    let bins = dir.path().join("bins");
    fs::create_dir(&bins).unwrap();
    fs::write(bins.join("driver.sys"), b"fake").unwrap();
    let config = dir.path().join("dllscan.json");
    fs::write(&config, r#"{"extensions": ["dll", "sys"]}"#).unwrap();

    let report = scan_json(&[
        bins.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--workers",
        "1",
    ]);
    assert_eq!(report["total_dlls_found"], 1);
    assert_eq!(report["dll_files"][0]["file_name"], "driver.sys");
}

/// A malformed config file is reported with context.
#[test]
fn scan_fails_for_malformed_config() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("broken.yaml");
    fs::write(&config, "extensions: [unterminated").unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("scan")
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load scan config"));
}

/// `patterns` lists the built-in languages in text and JSON form.
#[test]
fn patterns_lists_builtin_languages() {
    assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("patterns")
        .assert()
        .success()
        .stdout(predicate::str::contains("C/C++ [c]"))
        .stdout(predicate::str::contains("c.load_library (High, exact)"));

    let output = assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .arg("patterns")
        .arg("--json")
        .output()
        .expect("run dllscan");
    assert!(output.status.success());
    let languages: Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> =
        languages.as_array().unwrap().iter().filter_map(|l| l["id"].as_str()).collect();
    assert!(ids.contains(&"csharp"));
    assert!(ids.contains(&"python"));
}

/// Version-extraction steps land in the version log even without `-v`.
#[test]
fn scan_writes_version_extraction_log() {
    let dir = tempdir().expect("tempdir");
    let bins = dir.path().join("bins");
    fs::create_dir(&bins).unwrap();
    fs::write(bins.join("bare.dll"), minimal_pe()).unwrap();
    let logs = dir.path().join("logs");

    let output = assert_cmd::cargo::cargo_bin_cmd!("dllscan")
        .env("DLLSCAN_LOG_DIR", &logs)
        .arg("scan")
        .arg(&bins)
        .arg("--format")
        .arg("json")
        .output()
        .expect("run dllscan");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["dll_files"][0]["machine_type"], 0x8664);

    let log = fs::read_to_string(logs.join("dll_version_extraction.log")).expect("log file");
    assert!(log.contains("Starting version info extraction"), "log: {log}");
    assert!(log.contains("No version information could be extracted"), "log: {log}");
    assert!(log.contains("bare.dll"), "log: {log}");
    assert!(!String::from_utf8_lossy(&output.stderr).contains("Starting version info"));
}
