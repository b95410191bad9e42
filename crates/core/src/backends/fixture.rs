//! Hand-assembled PE32 images for unit tests.
//!
//! Images carry one section at RVA 0x1000 holding the export table, the
//! resource tree, and the import descriptors (last, so truncation can cut them).

const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER_LEN: usize = 224;
const SECTION_RVA: u32 = 0x1000;
const SECTION_FILE_OFFSET: usize = 0x200;

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn utf16z(text: &str) -> Vec<u8> {
    text.encode_utf16().chain(std::iter::once(0)).flat_map(u16::to_le_bytes).collect()
}

fn block(key: &str, value: &[u8], value_length: u16, value_type: u16, kids: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 2];
    out.extend_from_slice(&value_length.to_le_bytes());
    out.extend_from_slice(&value_type.to_le_bytes());
    out.extend(utf16z(key));
    pad4(&mut out);
    out.extend_from_slice(value);
    for kid in kids {
        pad4(&mut out);
        out.extend_from_slice(kid);
    }
    let len = out.len() as u16;
    put_u16(&mut out, 0, len);
    out
}

/// Builder for a raw `VS_VERSIONINFO` blob.
pub(crate) struct VersionFixture {
    root_key: String,
    fixed: Option<[u32; 4]>,
    translations: Vec<(u16, u16)>,
    tables: Vec<(String, Vec<(&'static str, String)>)>,
}

impl VersionFixture {
    pub(crate) fn new() -> Self {
        Self {
            root_key: "VS_VERSION_INFO".into(),
            fixed: None,
            translations: vec![],
            tables: vec![],
        }
    }

    pub(crate) fn root_key(mut self, key: &str) -> Self {
        self.root_key = key.into();
        self
    }

    pub(crate) fn fixed(mut self, file_ms: u32, file_ls: u32, prod_ms: u32, prod_ls: u32) -> Self {
        self.fixed = Some([file_ms, file_ls, prod_ms, prod_ls]);
        self
    }

    pub(crate) fn translation(mut self, lang: u16, codepage: u16) -> Self {
        self.translations.push((lang, codepage));
        self
    }

    pub(crate) fn table(mut self, key: &str, strings: Vec<(&'static str, String)>) -> Self {
        self.tables.push((key.into(), strings));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let fixed = match self.fixed {
            Some([file_ms, file_ls, prod_ms, prod_ls]) => {
                let words = [0xFEEF_04BD, 0x0001_0000, file_ms, file_ls, prod_ms, prod_ls];
                let mut value: Vec<u8> = words.iter().flat_map(|w: &u32| w.to_le_bytes()).collect();
                value.resize(52, 0);
                value
            }
            None => Vec::new(),
        };

        let tables: Vec<Vec<u8>> = self
            .tables
            .iter()
            .map(|(key, strings)| {
                let entries: Vec<Vec<u8>> = strings
                    .iter()
                    .map(|(name, value)| {
                        let text = utf16z(value);
                        block(name, &text, (text.len() / 2) as u16, 1, &[])
                    })
                    .collect();
                block(key, &[], 0, 1, &entries)
            })
            .collect();

        let mut children = Vec::new();
        if !tables.is_empty() {
            children.push(block("StringFileInfo", &[], 0, 1, &tables));
        }
        if !self.translations.is_empty() {
            let pairs: Vec<u8> = self
                .translations
                .iter()
                .flat_map(|(lang, cp)| [lang.to_le_bytes(), cp.to_le_bytes()].concat())
                .collect();
            let var = block("Translation", &pairs, pairs.len() as u16, 0, &[]);
            children.push(block("VarFileInfo", &[], 0, 1, &[var]));
        }
        block(&self.root_key, &fixed, fixed.len() as u16, 0, &children)
    }
}

/// Builder for a minimal PE32 DLL.
pub(crate) struct PeFixture {
    machine: u16,
    imports: Vec<String>,
    exports: Vec<String>,
    version: Option<Vec<u8>>,
    raw_resource: Option<Vec<u8>>,
    signed: bool,
    certificate: Option<(u32, u32)>,
    directory_count: u32,
    truncated_imports: bool,
}

impl PeFixture {
    pub(crate) fn new() -> Self {
        Self {
            machine: 0x014c,
            imports: vec![],
            exports: vec![],
            version: None,
            raw_resource: None,
            signed: false,
            certificate: None,
            directory_count: 16,
            truncated_imports: false,
        }
    }

    pub(crate) fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub(crate) fn import(mut self, name: &str) -> Self {
        self.imports.push(name.into());
        self
    }

    pub(crate) fn export(mut self, name: &str) -> Self {
        self.exports.push(name.into());
        self
    }

    pub(crate) fn version(mut self, version: VersionFixture) -> Self {
        self.version = Some(version.build());
        self
    }

    /// Resource directory bytes used verbatim instead of a generated tree.
    pub(crate) fn raw_resource(mut self, bytes: Vec<u8>) -> Self {
        self.raw_resource = Some(bytes);
        self
    }

    pub(crate) fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Certificate directory entry written verbatim, without certificate data.
    pub(crate) fn certificate_directory(mut self, address: u32, size: u32) -> Self {
        self.certificate = Some((address, size));
        self
    }

    /// `NumberOfRvaAndSizes` value; 16 directory slots are written regardless.
    pub(crate) fn directory_count(mut self, count: u32) -> Self {
        self.directory_count = count;
        self
    }

    /// Drop the all-zero terminator so the import walk runs off the image.
    pub(crate) fn truncate_imports(mut self) -> Self {
        self.truncated_imports = true;
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut data: Vec<u8> = Vec::new();
        let rva = |data: &Vec<u8>| SECTION_RVA + data.len() as u32;
        let mut directories = [(0u32, 0u32); 16];

        if !self.exports.is_empty() {
            let mut name_rvas = Vec::new();
            for name in &self.exports {
                name_rvas.push(rva(&data));
                data.extend_from_slice(name.as_bytes());
                data.push(0);
            }
            pad4(&mut data);
            let names_rva = rva(&data);
            for name_rva in &name_rvas {
                data.extend_from_slice(&name_rva.to_le_bytes());
            }
            let mut directory = [0u8; 40];
            put_u32(&mut directory, 20, name_rvas.len() as u32);
            put_u32(&mut directory, 24, name_rvas.len() as u32);
            put_u32(&mut directory, 32, names_rva);
            directories[0] = (rva(&data), 40);
            data.extend_from_slice(&directory);
        }

        if let Some(raw) = &self.raw_resource {
            pad4(&mut data);
            directories[2] = (rva(&data), raw.len() as u32);
            data.extend_from_slice(raw);
        } else if let Some(blob) = &self.version {
            pad4(&mut data);
            let base = rva(&data);
            let mut tree = Vec::new();
            for (id, target) in [(16u32, 0x8000_0000 | 24), (1, 0x8000_0000 | 48), (0x409, 72)] {
                let mut dir = [0u8; 24];
                put_u16(&mut dir, 14, 1);
                put_u32(&mut dir, 16, id);
                put_u32(&mut dir, 20, target);
                tree.extend_from_slice(&dir);
            }
            let mut entry = [0u8; 16];
            put_u32(&mut entry, 0, base + 88);
            put_u32(&mut entry, 4, blob.len() as u32);
            tree.extend_from_slice(&entry);
            tree.extend_from_slice(blob);
            directories[2] = (base, tree.len() as u32);
            data.extend(tree);
        }

        if !self.imports.is_empty() {
            let mut name_rvas = Vec::new();
            for name in &self.imports {
                name_rvas.push(rva(&data));
                data.extend_from_slice(name.as_bytes());
                data.push(0);
            }
            pad4(&mut data);
            let table_rva = rva(&data);
            for name_rva in &name_rvas {
                let mut descriptor = [0u8; 20];
                put_u32(&mut descriptor, 0, table_rva);
                put_u32(&mut descriptor, 12, *name_rva);
                put_u32(&mut descriptor, 16, table_rva);
                data.extend_from_slice(&descriptor);
            }
            if !self.truncated_imports {
                data.extend_from_slice(&[0u8; 20]);
            }
            directories[1] = (table_rva, 20 * (name_rvas.len() as u32 + 1));
        }

        let mut image = vec![0u8; SECTION_FILE_OFFSET];
        image[0..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3c, PE_OFFSET as u32);
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        put_u16(&mut image, coff, self.machine);
        put_u16(&mut image, coff + 2, 1);
        put_u32(&mut image, coff + 4, 0x5F00_0000);
        put_u16(&mut image, coff + 16, OPTIONAL_HEADER_LEN as u16);
        put_u16(&mut image, coff + 18, 0x2102);

        let opt = coff + 20;
        put_u16(&mut image, opt, 0x010b);
        put_u32(&mut image, opt + 28, 0x1000_0000);
        put_u32(&mut image, opt + 32, 0x1000);
        put_u32(&mut image, opt + 36, 0x200);
        put_u16(&mut image, opt + 40, 6);
        put_u16(&mut image, opt + 48, 6);
        put_u32(&mut image, opt + 56, 0x3000);
        put_u32(&mut image, opt + 60, SECTION_FILE_OFFSET as u32);
        put_u32(&mut image, opt + 64, 0x0001_2345);
        put_u16(&mut image, opt + 68, 2);
        put_u16(&mut image, opt + 70, 0x0140);
        put_u32(&mut image, opt + 92, self.directory_count);

        let section = opt + OPTIONAL_HEADER_LEN;
        image[section..section + 5].copy_from_slice(b".data");
        put_u32(&mut image, section + 8, data.len() as u32);
        put_u32(&mut image, section + 12, SECTION_RVA);
        put_u32(&mut image, section + 16, data.len() as u32);
        put_u32(&mut image, section + 20, SECTION_FILE_OFFSET as u32);
        put_u32(&mut image, section + 36, 0xC000_0040);

        image.extend_from_slice(&data);

        if self.signed {
            directories[4] = (image.len() as u32, 8);
            image.extend_from_slice(&[8, 0, 0, 0, 0, 2, 2, 0]);
        }
        if let Some(entry) = self.certificate {
            directories[4] = entry;
        }
        for (index, (address, size)) in directories.iter().enumerate() {
            put_u32(&mut image, opt + 96 + index * 8, *address);
            put_u32(&mut image, opt + 100 + index * 8, *size);
        }
        image
    }
}
