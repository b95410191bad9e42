//! Bounds-checked view over a mapped PE image.
//!
//! All reads return `None` instead of panicking so table walkers can turn a
//! short read into a `TruncatedTable` issue and keep what they already have.

use byteorder::{ByteOrder, LittleEndian};
use goblin::pe::section_table::SectionTable;

/// Upper bound for a NUL-terminated name read out of the image.
const MAX_NAME_LEN: usize = 512;

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes.get(offset..offset.checked_add(2)?).map(LittleEndian::read_u16)
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes.get(offset..offset.checked_add(4)?).map(LittleEndian::read_u32)
}

/// Raw file bytes plus the section table used to translate RVAs.
pub(crate) struct Image<'a> {
    bytes: &'a [u8],
    sections: Vec<SectionTable>,
}

impl<'a> Image<'a> {
    pub(crate) fn new(bytes: &'a [u8], sections: Vec<SectionTable>) -> Self {
        Self { bytes, sections }
    }

    pub(crate) fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Translate a relative virtual address into a file offset.
    pub(crate) fn offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|section| {
            let raw = section.size_of_raw_data;
            let span = if section.virtual_size == 0 { raw } else { section.virtual_size };
            let delta = rva.checked_sub(section.virtual_address)?;
            if delta >= span || delta >= raw {
                return None;
            }
            Some(section.pointer_to_raw_data as usize + delta as usize)
        })
    }

    pub(crate) fn u32_at_rva(&self, rva: u32) -> Option<u32> {
        read_u32(self.bytes, self.offset(rva)?)
    }

    /// Slice of `len` bytes starting at `rva`, if it lies fully inside the file.
    pub(crate) fn slice_at_rva(&self, rva: u32, len: usize) -> Option<&'a [u8]> {
        let start = self.offset(rva)?;
        self.bytes.get(start..start.checked_add(len)?)
    }

    /// NUL-terminated ASCII name at `rva`.
    pub(crate) fn name_at_rva(&self, rva: u32) -> Option<String> {
        let start = self.offset(rva)?;
        let tail = self.bytes.get(start..)?;
        let window = &tail[..tail.len().min(MAX_NAME_LEN)];
        let end = window.iter().position(|b| *b == 0)?;
        Some(String::from_utf8_lossy(&window[..end]).into_owned())
    }
}
