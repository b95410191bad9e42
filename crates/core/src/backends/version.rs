//! Version resource (`VS_VERSIONINFO`) decoding.
//!
//! The resource tree is walked type -> name -> language down to the first
//! `RT_VERSION` leaf. String values are then picked from the string table that
//! best matches the declared translations; see [`parse_version_resource`].

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use super::image::{read_u16, read_u32, Image};
use crate::model::VersionInfo;

/// String-table key used when no declared translation resolves
/// (US English, Unicode codepage).
pub const DEFAULT_TRANSLATION: &str = "040904B0";

/// Log target for the version-extraction steps. The CLI mirrors it into a
/// dedicated log file.
pub const LOG_TARGET: &str = "dllscan_core::version_extraction";

const RT_VERSION: u32 = 16;
const HIGH_BIT: u32 = 0x8000_0000;
const FIXED_INFO_SIGNATURE: u32 = 0xFEEF_04BD;
const MAX_DIR_ENTRIES: usize = 4096;
const TEXT_VALUE: u16 = 1;

/// Fields that make a string table "complete" for translation selection.
const REQUIRED_KEYS: [&str; 5] =
    ["CompanyName", "FileDescription", "FileVersion", "ProductVersion", "OriginalFilename"];

/// Version fields plus the damage skipped while decoding them.
#[derive(Debug, Default)]
pub struct DecodedVersion {
    pub info: VersionInfo,
    pub issues: Vec<String>,
}

/// Locate and decode the version resource of `image`.
///
/// A missing resource directory (or one without `RT_VERSION`) decodes to an
/// empty [`VersionInfo`]; an `Err` carries a description of why the resource
/// could not be decoded at all.
pub(crate) fn read_version_info(
    image: &Image<'_>,
    resource_rva: Option<u32>,
    file: &str,
) -> Result<DecodedVersion, String> {
    debug!(target: LOG_TARGET, file, "Starting version info extraction");
    let decoded = match resource_rva.filter(|rva| *rva != 0) {
        Some(rva) => locate_and_decode(image, rva),
        None => {
            debug!(target: LOG_TARGET, file, "image has no resource directory");
            Ok(DecodedVersion::default())
        }
    };
    match &decoded {
        Ok(DecodedVersion { info, .. }) if *info == VersionInfo::default() => {
            debug!(target: LOG_TARGET, file, "No version information could be extracted");
        }
        Ok(DecodedVersion { info, issues }) => debug!(
            target: LOG_TARGET,
            file,
            key = info.translation_used.as_deref().unwrap_or("fixed-info"),
            skipped = issues.len(),
            "Version info extracted"
        ),
        Err(message) => debug!(
            target: LOG_TARGET,
            file,
            error = %message,
            "No version information could be extracted"
        ),
    }
    decoded
}

fn locate_and_decode(image: &Image<'_>, resource_rva: u32) -> Result<DecodedVersion, String> {
    let base = image.offset(resource_rva).ok_or_else(|| {
        format!("resource directory RVA {resource_rva:#x} is outside every section")
    })?;
    let Some((rva, size)) = locate_version_data(image.bytes(), base)? else {
        return Ok(DecodedVersion::default());
    };
    let data = image
        .slice_at_rva(rva, size as usize)
        .ok_or_else(|| format!("version data at RVA {rva:#x} ({size} bytes) runs past the file"))?;
    parse_version_resource(data)
}

struct DirEntry {
    id: Option<u32>,
    target: u32,
    is_dir: bool,
}

fn read_directory(bytes: &[u8], base: usize, dir_offset: u32) -> Result<Vec<DirEntry>, String> {
    let start = base + dir_offset as usize;
    let truncated = || format!("resource directory at offset {start:#x} is truncated");
    let named = read_u16(bytes, start + 12).ok_or_else(truncated)? as usize;
    let ids = read_u16(bytes, start + 14).ok_or_else(truncated)? as usize;
    if named + ids > MAX_DIR_ENTRIES {
        return Err(format!("resource directory declares {} entries", named + ids));
    }
    (0..named + ids)
        .map(|i| -> Result<DirEntry, String> {
            let entry = start + 16 + i * 8;
            let name = read_u32(bytes, entry).ok_or_else(truncated)?;
            let target = read_u32(bytes, entry + 4).ok_or_else(truncated)?;
            Ok(DirEntry {
                id: (name & HIGH_BIT == 0).then_some(name),
                target: target & !HIGH_BIT,
                is_dir: target & HIGH_BIT != 0,
            })
        })
        .collect()
}

fn subdirectory(bytes: &[u8], base: usize, entry: &DirEntry) -> Result<Vec<DirEntry>, String> {
    if !entry.is_dir {
        return Err("resource entry points at data where a directory was expected".into());
    }
    read_directory(bytes, base, entry.target)
}

/// Returns the (RVA, size) of the first version resource leaf.
fn locate_version_data(bytes: &[u8], base: usize) -> Result<Option<(u32, u32)>, String> {
    let types = read_directory(bytes, base, 0)?;
    let Some(version) = types.iter().find(|e| e.id == Some(RT_VERSION)) else {
        return Ok(None);
    };
    let names = subdirectory(bytes, base, version)?;
    let name = names.first().ok_or("version resource has no name entries")?;
    let languages = subdirectory(bytes, base, name)?;
    let leaf = languages.first().ok_or("version resource has no language entries")?;
    if leaf.is_dir {
        return Err("version resource language entry is a directory".into());
    }
    let data_entry = base + leaf.target as usize;
    let rva = read_u32(bytes, data_entry).ok_or("version data entry is truncated")?;
    let size = read_u32(bytes, data_entry + 4).ok_or("version data entry is truncated")?;
    Ok(Some((rva, size)))
}

/// One `wLength/wValueLength/wType/szKey/Value/Children` record.
struct Block<'a> {
    key: String,
    value_type: u16,
    value: &'a [u8],
    children: &'a [u8],
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// NUL-terminated UTF-16LE string at `start`; returns it and the offset past the NUL.
fn read_utf16z(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut units = Vec::new();
    let mut pos = start;
    loop {
        let unit = read_u16(bytes, pos)?;
        pos += 2;
        if unit == 0 {
            return Some((String::from_utf16_lossy(&units), pos));
        }
        units.push(unit);
    }
}

fn parse_block(data: &[u8], offset: usize) -> Option<(Block<'_>, usize)> {
    let length = read_u16(data, offset)? as usize;
    let value_length = read_u16(data, offset + 2)? as usize;
    let value_type = read_u16(data, offset + 4)?;
    if length < 6 {
        return None;
    }
    let end = offset.checked_add(length)?;
    let block = data.get(..end)?;
    let (key, key_end) = read_utf16z(block, offset + 6)?;
    let value_start = align4(key_end).min(end);
    let value_bytes = if value_type == TEXT_VALUE { value_length * 2 } else { value_length };
    let value_end = (value_start + value_bytes).min(end);
    let children_start = align4(value_end).min(end);
    let parsed = Block {
        key,
        value_type,
        value: &block[value_start..value_end],
        children: &block[children_start..end],
    };
    Some((parsed, align4(end)))
}

/// Child blocks packed in `bytes`. A child that does not fit its parent ends
/// the walk and is reported in `issues`; trailing zero padding is not.
fn children<'a>(bytes: &'a [u8], parent: &str, issues: &mut Vec<String>) -> Vec<Block<'a>> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        match parse_block(bytes, offset) {
            Some((block, next)) => {
                blocks.push(block);
                offset = next;
            }
            None => {
                if bytes[offset..].iter().any(|b| *b != 0) {
                    issues.push(format!(
                        "{parent}: child block at offset {offset:#x} overruns its parent"
                    ));
                }
                break;
            }
        }
    }
    blocks
}

fn decode_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units).trim().to_string()
}

/// Numeric versions from `VS_FIXEDFILEINFO`.
struct FixedVersion {
    file: (u32, u32),
    product: (u32, u32),
}

impl FixedVersion {
    fn parse(value: &[u8]) -> Option<Self> {
        if read_u32(value, 0)? != FIXED_INFO_SIGNATURE {
            return None;
        }
        Some(Self {
            file: (read_u32(value, 8)?, read_u32(value, 12)?),
            product: (read_u32(value, 16)?, read_u32(value, 20)?),
        })
    }

    fn render((ms, ls): (u32, u32)) -> Option<String> {
        if ms == 0 && ls == 0 {
            return None;
        }
        Some(format!("{}.{}.{}.{}", ms >> 16, ms & 0xffff, ls >> 16, ls & 0xffff))
    }
}

struct StringTable {
    key: String,
    strings: BTreeMap<String, String>,
}

impl StringTable {
    fn value(&self, name: &str) -> Option<String> {
        self.strings.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn resolved_required(&self) -> usize {
        REQUIRED_KEYS.iter().filter(|k| self.value(k).is_some()).count()
    }
}

/// Pick the string table to read values from.
///
/// Declared translations are tried in order and the first one whose table has
/// every required field wins. Without a complete table the one with the most
/// resolved fields is used (earliest on ties). Failing that, the default key.
fn choose_table<'t>(translations: &[String], tables: &'t [StringTable]) -> Option<&'t StringTable> {
    let lookup = |key: &str| tables.iter().find(|t| t.key.eq_ignore_ascii_case(key));
    let mut best: Option<(&StringTable, usize)> = None;
    for key in translations {
        let Some(table) = lookup(key) else { continue };
        let resolved = table.resolved_required();
        if resolved == REQUIRED_KEYS.len() {
            return Some(table);
        }
        if resolved > 0 && best.map_or(true, |(_, n)| resolved > n) {
            best = Some((table, resolved));
        }
    }
    best.map(|(table, _)| table).or_else(|| lookup(DEFAULT_TRANSLATION))
}

/// Decode a raw `VS_VERSIONINFO` blob.
///
/// `FileVersion`/`ProductVersion` fall back to the numeric fixed info when the
/// chosen string table lacks them. Blocks that overrun their parent are
/// skipped and listed in [`DecodedVersion::issues`].
pub fn parse_version_resource(data: &[u8]) -> Result<DecodedVersion, String> {
    let (root, _) = parse_block(data, 0).ok_or("VS_VERSIONINFO header is truncated")?;
    if root.key != "VS_VERSION_INFO" {
        return Err(format!("unexpected version block key {:?}", root.key));
    }
    let fixed = FixedVersion::parse(root.value);

    let mut issues = Vec::new();
    let mut translations = Vec::new();
    let mut tables = Vec::new();
    for child in children(root.children, "VS_VERSION_INFO", &mut issues) {
        match child.key.as_str() {
            "StringFileInfo" => {
                for table in children(child.children, "StringFileInfo", &mut issues) {
                    let strings = children(table.children, &table.key, &mut issues)
                        .into_iter()
                        .map(|s| (s.key, decode_text(s.value)))
                        .collect();
                    tables.push(StringTable { key: table.key.to_ascii_uppercase(), strings });
                }
            }
            "VarFileInfo" => {
                for var in children(child.children, "VarFileInfo", &mut issues) {
                    if var.key != "Translation" || var.value_type == TEXT_VALUE {
                        continue;
                    }
                    for pair in var.value.chunks_exact(4) {
                        let lang = LittleEndian::read_u16(&pair[0..2]);
                        let codepage = LittleEndian::read_u16(&pair[2..4]);
                        translations.push(format!("{lang:04X}{codepage:04X}"));
                    }
                }
            }
            _ => {}
        }
    }

    let mut info = VersionInfo::default();
    if let Some(table) = choose_table(&translations, &tables) {
        debug!(target: LOG_TARGET, key = %table.key, "resolved string table");
        info.translation_used = Some(table.key.clone());
        info.company_name = table.value("CompanyName");
        info.file_description = table.value("FileDescription");
        info.file_version = table.value("FileVersion");
        info.product_version = table.value("ProductVersion");
        info.original_filename = table.value("OriginalFilename");
        info.legal_copyright = table.value("LegalCopyright");
        info.product_name = table.value("ProductName");
        info.internal_name = table.value("InternalName");
    } else if !tables.is_empty() {
        debug!(target: LOG_TARGET, tables = tables.len(), "no string table matches a usable key");
    }
    if let Some(fixed) = fixed {
        info.file_version = info.file_version.or_else(|| FixedVersion::render(fixed.file));
        info.product_version = info.product_version.or_else(|| FixedVersion::render(fixed.product));
    }
    Ok(DecodedVersion { info, issues })
}
