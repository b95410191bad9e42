//! PE/COFF metadata extraction.
//!
//! The DOS and COFF headers and the section table come from goblin. The
//! optional header, data directories and the import, export and resource
//! tables are read by hand over bounds-checked slices, so damage in one stage
//! leaves what earlier stages found in place. Stages run in order: container
//! check, architecture, optional header, tables, version resource, signature
//! presence.

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use goblin::pe::header::{self, CoffHeader, DosHeader};
use goblin::pe::optional_header::{MAGIC_32, MAGIC_64};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::image::{read_u16, read_u32, Image};
use super::version;
use super::{ExtractError, MetadataExtractor};
use crate::model::{Architecture, BinaryMetadata, FileIdentity, ParseIssue, ParseIssueKind};

const PE_SIGNATURE_LEN: usize = 4;
const IMPORT_DESCRIPTOR_LEN: u32 = 20;
const EXPORT_DIRECTORY_LEN: usize = 40;
const MAX_IMPORT_DESCRIPTORS: u32 = 4096;
const MAX_EXPORT_NAMES: u32 = 65_536;
const MAX_DATA_DIRECTORIES: u32 = 16;
const DATA_DIRECTORY_LEN: usize = 8;

const EXPORT_DIRECTORY: usize = 0;
const IMPORT_DIRECTORY: usize = 1;
const RESOURCE_DIRECTORY: usize = 2;
const CERTIFICATE_DIRECTORY: usize = 4;

const DLL_CHARACTERISTIC_NAMES: [(u16, &str); 11] = [
    (0x0020, "HIGH_ENTROPY_VA"),
    (0x0040, "DYNAMIC_BASE"),
    (0x0080, "FORCE_INTEGRITY"),
    (0x0100, "NX_COMPAT"),
    (0x0200, "NO_ISOLATION"),
    (0x0400, "NO_SEH"),
    (0x0800, "NO_BIND"),
    (0x1000, "APPCONTAINER"),
    (0x2000, "WDM_DRIVER"),
    (0x4000, "GUARD_CF"),
    (0x8000, "TERMINAL_SERVER_AWARE"),
];

/// Extractor for Windows PE images (DLL, OCX, CPL, DRV...).
#[derive(Debug, Clone)]
pub struct PeExtractor {
    hash_files: bool,
}

impl Default for PeExtractor {
    fn default() -> Self {
        Self { hash_files: true }
    }
}

impl PeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle SHA-256 hashing of file contents.
    pub fn with_hashing(mut self, hash_files: bool) -> Self {
        self.hash_files = hash_files;
        self
    }
}

impl MetadataExtractor for PeExtractor {
    fn extract(&self, path: &Path) -> Result<BinaryMetadata, ExtractError> {
        let bytes = fs::read(path)
            .map_err(|source| ExtractError::Unreadable { path: path.to_path_buf(), source })?;

        let identity = FileIdentity {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            file_path: path.display().to_string(),
            file_size: bytes.len() as u64,
            sha256: self.hash_files.then(|| format!("{:x}", Sha256::digest(&bytes))),
        };
        let record = inspect(identity, &bytes);
        debug!(
            file = %record.file_path,
            arch = %record.architecture,
            imports = record.imported_libraries.len(),
            exports = record.exported_functions.len(),
            issues = record.parse_errors.len(),
            "extracted metadata"
        );
        Ok(record)
    }

    fn name(&self) -> &'static str {
        "pe"
    }
}

/// Map a COFF machine value to an architecture.
pub fn architecture_for(machine: u16) -> Architecture {
    match machine {
        header::COFF_MACHINE_X86 => Architecture::X86,
        header::COFF_MACHINE_X86_64 => Architecture::X64,
        header::COFF_MACHINE_ARM | header::COFF_MACHINE_ARMNT => Architecture::Arm,
        header::COFF_MACHINE_ARM64 => Architecture::Arm64,
        _ => Architecture::Unknown,
    }
}

pub fn subsystem_name(subsystem: u16) -> &'static str {
    match subsystem {
        1 => "NATIVE",
        2 => "WINDOWS_GUI",
        3 => "WINDOWS_CUI",
        5 => "OS2_CUI",
        7 => "POSIX_CUI",
        9 => "WINDOWS_CE_GUI",
        10 => "EFI_APPLICATION",
        11 => "EFI_BOOT_SERVICE_DRIVER",
        12 => "EFI_RUNTIME_DRIVER",
        13 => "EFI_ROM",
        14 => "XBOX",
        16 => "WINDOWS_BOOT_APPLICATION",
        _ => "UNKNOWN",
    }
}

pub fn characteristic_names(flags: u16) -> Vec<String> {
    DLL_CHARACTERISTIC_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Build a metadata record from raw file bytes. Never fails; problems end up
/// in `parse_errors`.
pub fn inspect(identity: FileIdentity, bytes: &[u8]) -> BinaryMetadata {
    let coff_parsed = DosHeader::parse(bytes).and_then(|dos| {
        let mut offset = dos.pe_pointer as usize + PE_SIGNATURE_LEN;
        CoffHeader::parse(bytes, &mut offset).map(|coff| (coff, offset))
    });
    let (coff, optional_start) = match coff_parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!(file = %identity.file_path, error = %err, "not a PE image");
            let issue = ParseIssue::new(
                ParseIssueKind::NotABinaryImage,
                format!("not a recognized binary image: {err}"),
            );
            return BinaryMetadata::unparsed(identity, issue);
        }
    };

    let mut record = BinaryMetadata::empty(identity);
    record.machine_type = Some(coff.machine);
    record.architecture = architecture_for(coff.machine);
    record.timestamp = Some(coff.time_date_stamp);

    let optional_len = coff.size_of_optional_header as usize;
    if optional_len == 0 {
        record.parse_errors.push(ParseIssue::new(
            ParseIssueKind::MalformedHeader,
            "image has no optional header; tables skipped",
        ));
        return record;
    }
    let Some(optional) = OptionalHeader::read(bytes, optional_start, optional_len, &mut record)
    else {
        return record;
    };
    record.subsystem = Some(subsystem_name(optional.subsystem).to_string());
    record.dll_characteristics = characteristic_names(optional.dll_characteristics);
    record.checksum = Some(optional.check_sum);

    let mut offset = optional_start + optional_len;
    let sections = match coff.sections(bytes, &mut offset) {
        Ok(sections) => sections,
        Err(err) => {
            record.parse_errors.push(ParseIssue::new(
                ParseIssueKind::TruncatedTable,
                format!("section table: {err}"),
            ));
            Vec::new()
        }
    };
    let image = Image::new(bytes, sections);

    if let Some((rva, _)) = optional.directory(IMPORT_DIRECTORY) {
        let walk = read_imports(&image, rva);
        record.imported_libraries = walk.items;
        record.parse_errors.extend(walk.issue);
    }
    if let Some((rva, _)) = optional.directory(EXPORT_DIRECTORY) {
        let walk = read_exports(&image, rva);
        record.exported_functions = walk.items;
        record.parse_errors.extend(walk.issue);
    }
    let resource_rva = optional.directory(RESOURCE_DIRECTORY).map(|(rva, _)| rva);
    match version::read_version_info(&image, resource_rva, &record.file_path) {
        Ok(decoded) => {
            record.version = decoded.info;
            record.parse_errors.extend(
                decoded
                    .issues
                    .into_iter()
                    .map(|message| ParseIssue::new(ParseIssueKind::MalformedResource, message)),
            );
        }
        Err(message) => record
            .parse_errors
            .push(ParseIssue::new(ParseIssueKind::MalformedResource, message)),
    }
    // The certificate directory holds a file offset, which may legitimately be 0.
    record.is_signed =
        optional.directory(CERTIFICATE_DIRECTORY).is_some_and(|(_, size)| size != 0);
    record
}

/// The optional-header fields used here, read without trusting its counts.
struct OptionalHeader {
    subsystem: u16,
    dll_characteristics: u16,
    check_sum: u32,
    /// `(virtual_address, size)` per data directory, in directory order.
    directories: Vec<(u32, u32)>,
}

impl OptionalHeader {
    /// Read the header at `start`. Damage is recorded on `record` as a
    /// `MalformedHeader` issue; `None` means the directories are unusable.
    fn read(bytes: &[u8], start: usize, len: usize, record: &mut BinaryMetadata) -> Option<Self> {
        let mut malformed = |message: String| {
            record.parse_errors.push(ParseIssue::new(ParseIssueKind::MalformedHeader, message));
        };
        let available = bytes.get(start..).unwrap_or_default();
        if available.len() < len {
            malformed(format!(
                "optional header declares {len} bytes but only {} remain in the file",
                available.len()
            ));
        }
        let header = &available[..len.min(available.len())];

        let (count_at, directories_at) = match read_u16(header, 0) {
            Some(MAGIC_32) => (92, 96),
            Some(MAGIC_64) => (108, 112),
            Some(magic) => {
                malformed(format!("unknown optional header magic {magic:#x}; tables skipped"));
                return None;
            }
            None => {
                malformed("optional header is empty; tables skipped".to_string());
                return None;
            }
        };
        let fields = (read_u32(header, 64), read_u16(header, 68), read_u16(header, 70));
        let (Some(check_sum), Some(subsystem), Some(dll_characteristics)) = fields else {
            malformed("optional header is truncated before its Windows fields".to_string());
            return None;
        };

        let declared = read_u32(header, count_at).unwrap_or(0);
        if declared > MAX_DATA_DIRECTORIES {
            malformed(format!(
                "optional header declares {declared} data directories; \
                 reading {MAX_DATA_DIRECTORIES}"
            ));
        }
        let wanted = declared.min(MAX_DATA_DIRECTORIES) as usize;
        let fits = header.len().saturating_sub(directories_at) / DATA_DIRECTORY_LEN;
        if fits < wanted {
            malformed(format!("only {fits} of {wanted} data directories fit the optional header"));
        }
        let directories = (0..wanted.min(fits))
            .filter_map(|index| {
                let at = directories_at + index * DATA_DIRECTORY_LEN;
                Some((read_u32(header, at)?, read_u32(header, at + 4)?))
            })
            .collect();

        Some(Self { subsystem, dll_characteristics, check_sum, directories })
    }

    /// A data directory, unless it is absent or entirely zero.
    fn directory(&self, index: usize) -> Option<(u32, u32)> {
        self.directories.get(index).copied().filter(|&(rva, size)| rva != 0 || size != 0)
    }
}

/// Entries read from one table plus the issue that stopped the walk, if any.
struct TableWalk {
    items: Vec<String>,
    issue: Option<ParseIssue>,
}

impl TableWalk {
    fn complete(items: Vec<String>) -> Self {
        Self { items, issue: None }
    }

    fn truncated(items: Vec<String>, message: String) -> Self {
        Self { items, issue: Some(ParseIssue::new(ParseIssueKind::TruncatedTable, message)) }
    }
}

/// Library names from the import descriptors, first spelling kept on duplicates.
fn read_imports(image: &Image<'_>, table_rva: u32) -> TableWalk {
    let mut names: Vec<String> = Vec::new();
    if table_rva == 0 {
        return TableWalk::complete(names);
    }
    for index in 0..MAX_IMPORT_DESCRIPTORS {
        let rva = table_rva.saturating_add(index * IMPORT_DESCRIPTOR_LEN);
        let Some(descriptor) = image.slice_at_rva(rva, IMPORT_DESCRIPTOR_LEN as usize) else {
            return TableWalk::truncated(
                names,
                format!("import descriptor {index} at RVA {rva:#x} runs past the image"),
            );
        };
        if descriptor.iter().all(|b| *b == 0) {
            return TableWalk::complete(names);
        }
        let name_rva = LittleEndian::read_u32(&descriptor[12..16]);
        let Some(name) = image.name_at_rva(name_rva) else {
            return TableWalk::truncated(
                names,
                format!("import descriptor {index} names an unreadable RVA {name_rva:#x}"),
            );
        };
        if !name.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }
    TableWalk::truncated(names, format!("import table exceeds {MAX_IMPORT_DESCRIPTORS} entries"))
}

/// Exported symbol names in name-pointer-table order.
fn read_exports(image: &Image<'_>, table_rva: u32) -> TableWalk {
    let mut names = Vec::new();
    if table_rva == 0 {
        return TableWalk::complete(names);
    }
    let Some(directory) = image.slice_at_rva(table_rva, EXPORT_DIRECTORY_LEN) else {
        return TableWalk::truncated(
            names,
            format!("export directory at RVA {table_rva:#x} runs past the image"),
        );
    };
    let count = LittleEndian::read_u32(&directory[24..28]);
    let pointers_rva = LittleEndian::read_u32(&directory[32..36]);
    for index in 0..count.min(MAX_EXPORT_NAMES) {
        let pointer = pointers_rva.checked_add(index * 4).and_then(|rva| image.u32_at_rva(rva));
        let Some(name) = pointer.and_then(|rva| image.name_at_rva(rva)) else {
            return TableWalk::truncated(
                names,
                format!("export name {index} of {count} could not be read"),
            );
        };
        names.push(name);
    }
    if count > MAX_EXPORT_NAMES {
        return TableWalk::truncated(
            names,
            format!("export table declares {count} names; read the first {MAX_EXPORT_NAMES}"),
        );
    }
    TableWalk::complete(names)
}
