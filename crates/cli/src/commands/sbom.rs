//! CycloneDX 1.6 export of a scan report.
//!
//! One `library` component per scanned binary. Everything the report knows about a
//! binary that has no native CycloneDX field is carried as a `dll.*` property.

use std::collections::HashSet;

use chrono::Utc;
use dllscan_core::model::{or_unknown, BinaryMetadata, ScanReport};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Exports beyond this count are left out of the `dll.exported_functions` property.
pub const MAX_EXPORTS_LISTED: usize = 50;

/// Top-level CycloneDX BOM document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneDxBom {
    pub bom_format: &'static str,
    pub spec_version: &'static str,
    pub serial_number: String,
    pub version: u32,
    pub metadata: Metadata,
    pub components: Vec<Component>,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    /// RFC 3339 generation time.
    pub timestamp: String,
    pub tools: Tools,
    /// The project the scanned binaries belong to.
    pub component: Component,
    pub properties: Vec<Property>,
}

#[derive(Debug, Serialize)]
pub struct Tools {
    pub components: Vec<Component>,
}

#[derive(Debug, Serialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub type_: &'static str,
    #[serde(rename = "bom-ref")]
    pub bom_ref: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<Hash>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
}

#[derive(Debug, Serialize)]
pub struct Hash {
    pub alg: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    fn new(name: &str, value: impl ToString) -> Self {
        Self { name: name.to_string(), value: value.to_string() }
    }
}

/// Package identifier for one binary: `pkg:dll/<name>@<version>?arch=<arch>`.
pub fn bom_ref(binary: &BinaryMetadata) -> String {
    format!(
        "pkg:dll/{}@{}?arch={}",
        binary.file_name,
        or_unknown(&binary.version.file_version).to_lowercase(),
        binary.architecture.as_str().to_lowercase()
    )
}

/// Build the BOM for `report`, rooted at the given project.
pub fn to_cyclonedx(
    report: &ScanReport,
    project_name: &str,
    project_version: &str,
) -> CycloneDxBom {
    let mut seen = HashSet::new();
    let components: Vec<Component> = report
        .dll_files
        .iter()
        .map(|binary| {
            let mut component = binary_component(report, binary);
            // Same name, version and architecture in two directories.
            if !seen.insert(component.bom_ref.clone()) {
                component.bom_ref = format!("{}&path={}", component.bom_ref, binary.file_path);
            }
            component
        })
        .collect();

    let mut properties = vec![
        Property::new("scan.path", &report.scan_path),
        Property::new("scan.recursive", report.recursive),
        Property::new("scan.duration_seconds", format!("{:.3}", report.scan_duration_seconds)),
        Property::new("scan.total_files_scanned", report.total_files_scanned),
        Property::new("scan.total_dlls_found", report.total_dlls_found),
        Property::new("scan.complete", report.complete),
    ];
    if let Some(source) = &report.source_path {
        properties.push(Property::new("scan.source_path", source));
    }

    CycloneDxBom {
        bom_format: "CycloneDX",
        spec_version: "1.6",
        serial_number: serial_number(&components),
        version: 1,
        metadata: Metadata {
            timestamp: Utc::now().to_rfc3339(),
            tools: Tools {
                components: vec![Component {
                    type_: "application",
                    bom_ref: format!("pkg:generic/dllscan@{}", env!("CARGO_PKG_VERSION")),
                    name: "dllscan".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    publisher: None,
                    description: None,
                    scope: None,
                    hashes: Vec::new(),
                    properties: Vec::new(),
                }],
            },
            component: Component {
                type_: "application",
                bom_ref: format!("pkg:generic/{project_name}@{project_version}"),
                name: project_name.to_string(),
                version: project_version.to_string(),
                publisher: None,
                description: None,
                scope: None,
                hashes: Vec::new(),
                properties: Vec::new(),
            },
            properties,
        },
        components,
    }
}

fn binary_component(report: &ScanReport, binary: &BinaryMetadata) -> Component {
    let version = &binary.version;
    let mut properties = vec![
        Property::new("dll.file_path", &binary.file_path),
        Property::new("dll.file_size", binary.file_size),
        Property::new("dll.architecture", binary.architecture),
    ];
    if let Some(machine) = binary.machine_type {
        properties.push(Property::new("dll.machine_type", format!("0x{machine:04x}")));
    }
    if let Some(subsystem) = &binary.subsystem {
        properties.push(Property::new("dll.subsystem", subsystem));
    }
    if let Some(timestamp) = binary.timestamp {
        properties.push(Property::new("dll.timestamp", timestamp));
    }
    let optional = [
        ("dll.file_version", &version.file_version),
        ("dll.product_version", &version.product_version),
        ("dll.product_name", &version.product_name),
        ("dll.internal_name", &version.internal_name),
        ("dll.original_filename", &version.original_filename),
        ("dll.legal_copyright", &version.legal_copyright),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            properties.push(Property::new(name, value));
        }
    }
    properties.push(Property::new("dll.is_signed", binary.is_signed));
    if let Some(checksum) = binary.checksum {
        properties.push(Property::new("dll.checksum", format!("0x{checksum:08x}")));
    }
    if !binary.dll_characteristics.is_empty() {
        let flags = binary.dll_characteristics.join(", ");
        properties.push(Property::new("dll.characteristics", flags));
    }
    if !binary.imported_libraries.is_empty() {
        properties.push(Property::new("dll.imported_dlls", binary.imported_libraries.join(", ")));
    }
    if !binary.exported_functions.is_empty() {
        let listed: Vec<&str> = binary
            .exported_functions
            .iter()
            .take(MAX_EXPORTS_LISTED)
            .map(String::as_str)
            .collect();
        properties.push(Property::new("dll.exported_functions", listed.join(", ")));
        properties.push(Property::new("dll.export_count", binary.exported_functions.len()));
    }
    if !binary.parse_errors.is_empty() {
        let messages: Vec<&str> =
            binary.parse_errors.iter().map(|e| e.message.as_str()).collect();
        properties.push(Property::new("dll.parse_errors", messages.join("; ")));
    }
    if let Some(analysis) = report.analysis_for(binary) {
        properties.push(Property::new("dll.confirmed", analysis.confirmed));
        properties.push(Property::new("dll.evidence_count", analysis.evidence.len()));
        if let Some(confidence) = analysis.max_confidence() {
            properties.push(Property::new("dll.max_confidence", confidence.as_str()));
        }
    }

    let hashes = binary
        .sha256
        .as_ref()
        .map(|digest| vec![Hash { alg: "SHA-256", content: digest.clone() }])
        .unwrap_or_default();

    Component {
        type_: "library",
        bom_ref: bom_ref(binary),
        name: binary.file_name.clone(),
        version: or_unknown(&version.file_version).to_string(),
        publisher: version.company_name.clone(),
        description: version.file_description.clone(),
        scope: Some("required"),
        hashes,
        properties,
    }
}

/// Deterministic `urn:uuid:` derived from the component identities.
fn serial_number(components: &[Component]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.bom_ref.as_bytes());
        for hash in &component.hashes {
            hasher.update(b"#");
            hasher.update(hash.content.as_bytes());
        }
        hasher.update(b"\n");
    }
    let hex = hex::encode(&hasher.finalize()[..16]);
    format!(
        "urn:uuid:{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
