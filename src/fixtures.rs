//! Synthetic binaries for the unit tests
//!
//! Images are minimal PE32 (or PE32+) files with a single section mapped at RVA 0x1000
//! holding every directory (imports, exports, runtime header and metadata).

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

const SECTION_RVA: u32 = 0x1000;
const SECTION_OFFSET: usize = 0x200;
const FILE_ALIGNMENT: usize = 0x200;
const OPTIONAL_HEADER_OFFSET: usize = 0x58;
const PE32_OPTIONAL_HEADER_SIZE: usize = 0xe0;
const PE32_PLUS_OPTIONAL_HEADER_SIZE: usize = 0xf0;

/// The ECMA standard public key, whose token is b77a5c561934e089
pub const ECMA_PUBLIC_KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
pub const SYSTEM_RUNTIME_TOKEN: [u8; 8] = [0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a];

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn pad(buf: &mut Vec<u8>, alignment: usize) {
    while buf.len() % alignment != 0 {
        buf.push(0);
    }
}

/// Contents of the only section, addressed by RVA
struct Section {
    data: Vec<u8>,
}

impl Section {
    fn next_rva(&self) -> u32 {
        SECTION_RVA + self.data.len() as u32
    }

    fn append(&mut self, bytes: &[u8]) -> u32 {
        let rva = self.next_rva();
        self.data.extend_from_slice(bytes);
        pad(&mut self.data, 4);
        rva
    }

    fn cstr(&mut self, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.append(&bytes)
    }

    fn patch_u16(&mut self, rva: u32, value: u16) {
        put_u16(&mut self.data, (rva - SECTION_RVA) as usize, value)
    }

    fn patch_u32(&mut self, rva: u32, value: u32) {
        put_u32(&mut self.data, (rva - SECTION_RVA) as usize, value)
    }
}

struct ClrSpec {
    flags: u32,
    entry_point_token: u32,
    metadata: Option<Vec<u8>>,
}

pub struct PeBuilder {
    is_dll: bool,
    is_64: bool,
    export_name: Option<String>,
    imports: Vec<String>,
    clr: Option<ClrSpec>,
}

impl PeBuilder {
    pub fn exe() -> Self {
        Self {
            is_dll: false,
            is_64: false,
            export_name: None,
            imports: Vec::new(),
            clr: None,
        }
    }

    /// A DLL exporting one function under the given module name
    pub fn dll(name: &str) -> Self {
        Self {
            is_dll: true,
            export_name: Some(name.to_owned()),
            ..Self::exe()
        }
    }

    /// A DLL without an export directory
    pub fn anonymous_dll() -> Self {
        Self {
            is_dll: true,
            ..Self::exe()
        }
    }

    /// An IL-only assembly
    pub fn managed(metadata: &MetadataBuilder, entry_point: bool) -> Self {
        Self {
            is_dll: !entry_point,
            clr: Some(ClrSpec {
                flags: 0x1,
                entry_point_token: if entry_point { 0x0600_0001 } else { 0 },
                metadata: Some(metadata.build()),
            }),
            ..Self::exe()
        }
    }

    /// An image with a runtime header but no readable metadata
    pub fn with_runtime_header(mut self, il_only: bool) -> Self {
        self.clr = Some(ClrSpec {
            flags: if il_only { 0x1 } else { 0x10 },
            entry_point_token: 0,
            metadata: None,
        });
        self
    }

    /// Replace the metadata of an assembly with the given bytes
    pub fn with_raw_metadata(mut self, metadata: &[u8]) -> Self {
        if let Some(clr) = self.clr.as_mut() {
            clr.metadata = Some(metadata.to_vec());
        }
        self
    }

    /// Write a PE32+ (64-bit) optional header instead of a PE32 one
    pub fn pe32_plus(mut self) -> Self {
        self.is_64 = true;
        self
    }

    pub fn import(mut self, dll: &str) -> Self {
        self.imports.push(dll.to_owned());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // a single `ret` at the start of the section serves as entry point and export
        let mut section = Section { data: vec![0xc3] };
        pad(&mut section.data, 16);
        let code_rva = SECTION_RVA;
        let mut directories = [(0u32, 0u32); 16];

        if !self.imports.is_empty() {
            let table_size = (self.imports.len() + 1) * 20;
            let descriptors = section.append(&vec![0u8; table_size]);
            for (i, dll) in self.imports.iter().enumerate() {
                let name = section.cstr(dll);
                let mut hint_name = vec![0u8, 0u8];
                hint_name.extend_from_slice(format!("Function{}", i).as_bytes());
                hint_name.push(0);
                let hint_name = section.append(&hint_name);
                // one thunk and the null terminator, 8 bytes each in PE32+
                let mut thunks = if self.is_64 {
                    u64::from(hint_name).to_le_bytes().to_vec()
                } else {
                    hint_name.to_le_bytes().to_vec()
                };
                thunks.resize(thunks.len() * 2, 0);
                let lookup_table = section.append(&thunks);
                let address_table = section.append(&thunks);
                let descriptor = descriptors + i as u32 * 20;
                section.patch_u32(descriptor, lookup_table);
                section.patch_u32(descriptor + 12, name);
                section.patch_u32(descriptor + 16, address_table);
            }
            directories[1] = (descriptors, table_size as u32);
        }

        if let Some(export_name) = &self.export_name {
            let directory = section.append(&[0u8; 40]);
            let name = section.cstr(export_name);
            let function_name = section.cstr("Function");
            let functions = section.append(&code_rva.to_le_bytes());
            let names = section.append(&function_name.to_le_bytes());
            let ordinals = section.append(&0u16.to_le_bytes());
            section.patch_u32(directory + 12, name);
            section.patch_u32(directory + 16, 1);
            section.patch_u32(directory + 20, 1);
            section.patch_u32(directory + 24, 1);
            section.patch_u32(directory + 28, functions);
            section.patch_u32(directory + 32, names);
            section.patch_u32(directory + 36, ordinals);
            directories[0] = (directory, section.next_rva() - directory);
        }

        if let Some(clr) = &self.clr {
            let header = section.append(&[0u8; 72]);
            section.patch_u32(header, 72);
            section.patch_u16(header + 4, 2);
            section.patch_u16(header + 6, 5);
            if let Some(metadata) = &clr.metadata {
                let rva = section.append(metadata);
                section.patch_u32(header + 8, rva);
                section.patch_u32(header + 12, metadata.len() as u32);
            }
            section.patch_u32(header + 16, clr.flags);
            section.patch_u32(header + 20, clr.entry_point_token);
            directories[14] = (header, 72);
        }

        pad(&mut section.data, FILE_ALIGNMENT);
        let raw_size = section.data.len() as u32;

        let mut image = vec![0u8; SECTION_OFFSET];
        image[..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3c, 0x40);
        image[0x40..0x44].copy_from_slice(b"PE\0\0");

        let optional_header_size = if self.is_64 {
            PE32_PLUS_OPTIONAL_HEADER_SIZE
        } else {
            PE32_OPTIONAL_HEADER_SIZE
        };
        let coff = 0x44;
        put_u16(&mut image, coff, if self.is_64 { 0x8664 } else { 0x14c });
        put_u16(&mut image, coff + 2, 1);
        put_u16(&mut image, coff + 16, optional_header_size as u16);
        let characteristics = if self.is_dll { 0x2102 } else { 0x0102 };
        put_u16(&mut image, coff + 18, characteristics);

        let opt = OPTIONAL_HEADER_OFFSET;
        put_u16(&mut image, opt, if self.is_64 { 0x20b } else { 0x10b });
        image[opt + 2] = 14;
        put_u32(&mut image, opt + 4, raw_size);
        put_u32(&mut image, opt + 16, code_rva);
        put_u32(&mut image, opt + 20, SECTION_RVA);
        if self.is_64 {
            // ImageBase is 64 bits wide and takes the place of BaseOfData
            image[opt + 24..opt + 32].copy_from_slice(&0x1_4000_0000u64.to_le_bytes());
        } else {
            put_u32(&mut image, opt + 24, SECTION_RVA);
            put_u32(&mut image, opt + 28, 0x0040_0000);
        }
        put_u32(&mut image, opt + 32, 0x1000);
        put_u32(&mut image, opt + 36, FILE_ALIGNMENT as u32);
        put_u16(&mut image, opt + 40, 6);
        put_u16(&mut image, opt + 48, 6);
        let image_size = SECTION_RVA + ((raw_size + 0xfff) & !0xfff);
        put_u32(&mut image, opt + 56, image_size);
        put_u32(&mut image, opt + 60, SECTION_OFFSET as u32);
        put_u16(&mut image, opt + 68, 3);
        // stack and heap sizes, then LoaderFlags and NumberOfRvaAndSizes
        let rva_count = if self.is_64 {
            for (i, size) in [0x0010_0000u64, 0x1000, 0x0010_0000, 0x1000].iter().enumerate() {
                image[opt + 72 + i * 8..opt + 80 + i * 8].copy_from_slice(&size.to_le_bytes());
            }
            opt + 108
        } else {
            put_u32(&mut image, opt + 72, 0x0010_0000);
            put_u32(&mut image, opt + 76, 0x1000);
            put_u32(&mut image, opt + 80, 0x0010_0000);
            put_u32(&mut image, opt + 84, 0x1000);
            opt + 92
        };
        put_u32(&mut image, rva_count, 16);
        for (i, (rva, size)) in directories.iter().enumerate() {
            put_u32(&mut image, rva_count + 4 + i * 8, *rva);
            put_u32(&mut image, rva_count + 8 + i * 8, *size);
        }

        let sh = OPTIONAL_HEADER_OFFSET + optional_header_size;
        image[sh..sh + 5].copy_from_slice(b".text");
        put_u32(&mut image, sh + 8, raw_size);
        put_u32(&mut image, sh + 12, SECTION_RVA);
        put_u32(&mut image, sh + 16, raw_size);
        put_u32(&mut image, sh + 20, SECTION_OFFSET as u32);
        put_u32(&mut image, sh + 36, 0xe000_0020);

        image.extend_from_slice(&section.data);
        image
    }
}

struct AssemblySpec {
    name: String,
    version: [u16; 4],
    public_key: Option<Vec<u8>>,
}

struct ReferenceSpec {
    name: String,
    version: [u16; 4],
    token: Option<[u8; 8]>,
}

/// ECMA-335 metadata with an assembly manifest, assembly references and optionally a
/// `TargetFrameworkAttribute`
#[derive(Default)]
pub struct MetadataBuilder {
    assembly: Option<AssemblySpec>,
    references: Vec<ReferenceSpec>,
    target_framework: Option<(String, Option<String>)>,
}

fn compressed_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        vec![0x80 | (len >> 8) as u8, len as u8]
    }
}

fn ser_string(s: &str) -> Vec<u8> {
    let mut out = compressed_len(s.len());
    out.extend_from_slice(s.as_bytes());
    out
}

struct Heaps {
    strings: Vec<u8>,
    blob: Vec<u8>,
}

impl Heaps {
    fn new() -> Self {
        Self {
            strings: vec![0],
            blob: vec![0],
        }
    }

    fn string(&mut self, s: &str) -> u16 {
        if s.is_empty() {
            return 0;
        }
        let index = self.strings.len() as u16;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        index
    }

    fn blob(&mut self, b: &[u8]) -> u16 {
        if b.is_empty() {
            return 0;
        }
        let index = self.blob.len() as u16;
        self.blob.extend(compressed_len(b.len()));
        self.blob.extend_from_slice(b);
        index
    }
}

impl MetadataBuilder {
    pub fn assembly(name: &str, version: [u16; 4]) -> Self {
        Self {
            assembly: Some(AssemblySpec {
                name: name.to_owned(),
                version,
                public_key: None,
            }),
            ..Self::default()
        }
    }

    /// Metadata of a module without an assembly manifest
    pub fn module_only() -> Self {
        Self::default()
    }

    pub fn public_key(mut self, key: &[u8]) -> Self {
        if let Some(assembly) = self.assembly.as_mut() {
            assembly.public_key = Some(key.to_vec());
        }
        self
    }

    pub fn reference(mut self, name: &str, version: [u16; 4], token: Option<[u8; 8]>) -> Self {
        self.references.push(ReferenceSpec {
            name: name.to_owned(),
            version,
            token,
        });
        self
    }

    pub fn target_framework(mut self, name: &str, display_name: Option<&str>) -> Self {
        self.target_framework = Some((name.to_owned(), display_name.map(str::to_owned)));
        self
    }

    fn tables(&self, heaps: &mut Heaps) -> Vec<u8> {
        let has_attribute = self.target_framework.is_some() && self.assembly.is_some();
        let mut counts: Vec<(u8, u32)> = vec![(0x00, 1)];
        if has_attribute {
            counts.push((0x01, 1));
        }
        counts.push((0x02, 1));
        if has_attribute {
            counts.extend_from_slice(&[(0x0a, 1), (0x0c, 1)]);
        }
        if self.assembly.is_some() {
            counts.push((0x20, 1));
        }
        if !self.references.is_empty() {
            counts.push((0x23, self.references.len() as u32));
        }

        let mut t = Vec::new();
        t.extend_from_slice(&0u32.to_le_bytes());
        t.extend_from_slice(&[2, 0, 0, 1]);
        let valid = counts.iter().fold(0u64, |v, (table, _)| v | (1u64 << *table));
        t.extend_from_slice(&valid.to_le_bytes());
        t.extend_from_slice(&(1u64 << 0x0c).to_le_bytes());
        for (_, rows) in &counts {
            t.extend_from_slice(&rows.to_le_bytes());
        }
        let push16 = |t: &mut Vec<u8>, v: u16| t.extend_from_slice(&v.to_le_bytes());

        // Module
        let module_name = match &self.assembly {
            Some(a) => format!("{}.dll", a.name),
            None => "module.netmodule".to_owned(),
        };
        push16(&mut t, 0);
        push16(&mut t, heaps.string(&module_name));
        push16(&mut t, 1);
        push16(&mut t, 0);
        push16(&mut t, 0);

        if has_attribute {
            // TypeRef, scoped to the first assembly reference or to the module
            let scope = if self.references.is_empty() { 1 << 2 } else { (1 << 2) | 2 };
            push16(&mut t, scope);
            push16(&mut t, heaps.string("TargetFrameworkAttribute"));
            push16(&mut t, heaps.string("System.Runtime.Versioning"));
        }

        // TypeDef: the <Module> pseudo type every module carries
        t.extend_from_slice(&0u32.to_le_bytes());
        push16(&mut t, heaps.string("<Module>"));
        push16(&mut t, 0);
        push16(&mut t, 0);
        push16(&mut t, 1);
        push16(&mut t, 1);

        if let (true, Some((name, display_name))) = (has_attribute, &self.target_framework) {
            // MemberRef: .ctor(string) on TypeRef 1
            push16(&mut t, (1 << 3) | 1);
            push16(&mut t, heaps.string(".ctor"));
            push16(&mut t, heaps.blob(&[0x20, 0x01, 0x01, 0x0e]));
            // CustomAttribute on Assembly 1, constructed through MemberRef 1
            let mut value = vec![0x01, 0x00];
            value.extend(ser_string(name));
            match display_name {
                Some(display_name) => {
                    value.extend_from_slice(&1u16.to_le_bytes());
                    value.extend_from_slice(&[0x54, 0x0e]);
                    value.extend(ser_string("FrameworkDisplayName"));
                    value.extend(ser_string(display_name));
                }
                None => value.extend_from_slice(&0u16.to_le_bytes()),
            }
            push16(&mut t, (1 << 5) | 14);
            push16(&mut t, (1 << 3) | 3);
            push16(&mut t, heaps.blob(&value));
        }

        if let Some(assembly) = &self.assembly {
            t.extend_from_slice(&0x8004u32.to_le_bytes());
            for v in assembly.version {
                push16(&mut t, v);
            }
            let flags: u32 = if assembly.public_key.is_some() { 1 } else { 0 };
            t.extend_from_slice(&flags.to_le_bytes());
            push16(&mut t, heaps.blob(assembly.public_key.as_deref().unwrap_or(&[])));
            push16(&mut t, heaps.string(&assembly.name));
            push16(&mut t, 0);
        }

        for reference in &self.references {
            for v in reference.version {
                push16(&mut t, v);
            }
            t.extend_from_slice(&0u32.to_le_bytes());
            let token = reference.token.map(|t| t.to_vec()).unwrap_or_default();
            push16(&mut t, heaps.blob(&token));
            push16(&mut t, heaps.string(&reference.name));
            push16(&mut t, 0);
            push16(&mut t, 0);
        }
        t
    }

    pub fn build(&self) -> Vec<u8> {
        let mut heaps = Heaps::new();
        let mut tables = self.tables(&mut heaps);
        let mut strings = std::mem::take(&mut heaps.strings);
        let mut blob = std::mem::take(&mut heaps.blob);
        pad(&mut tables, 4);
        pad(&mut strings, 4);
        pad(&mut blob, 4);
        let guid = vec![0x5au8; 16];
        let user_strings = vec![0u8; 4];

        let streams: [(&str, &[u8]); 5] = [
            ("#~", &tables),
            ("#Strings", &strings),
            ("#US", &user_strings),
            ("#GUID", &guid),
            ("#Blob", &blob),
        ];

        let version = b"v4.0.30319\0\0";
        let mut root = Vec::new();
        root.extend_from_slice(&0x424a_5342u32.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&(version.len() as u32).to_le_bytes());
        root.extend_from_slice(version);
        root.extend_from_slice(&0u16.to_le_bytes());
        root.extend_from_slice(&(streams.len() as u16).to_le_bytes());

        let padded_name = |name: &str| (name.len() + 4) & !3;
        let headers_len: usize = streams.iter().map(|(n, _)| 8 + padded_name(n)).sum();
        let mut offset = root.len() + headers_len;
        for (name, data) in &streams {
            root.extend_from_slice(&(offset as u32).to_le_bytes());
            root.extend_from_slice(&(data.len() as u32).to_le_bytes());
            let mut n = name.as_bytes().to_vec();
            n.resize(padded_name(name), 0);
            root.extend_from_slice(&n);
            offset += data.len();
        }
        for (_, data) in &streams {
            root.extend_from_slice(data);
        }
        root
    }
}

/// A zip archive with the given entries
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer
            .write_all(content.as_bytes())
            .expect("write zip entry");
    }
    writer.finish().expect("finish zip archive").into_inner()
}

pub const MANIFEST: &str = "Manifest-Version: 1.0\r\n\
Implementation-Title: commons-text\r\n\
Implementation-Version: 1.10.0\r\n\
Created-By: Apache Maven\r\n\
\r\n\
Name: org/apache/commons/text/\r\n\
Implementation-Title: section value\r\n";

pub const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <parent>
    <groupId>org.apache.commons</groupId>
    <artifactId>commons-parent</artifactId>
    <version>54</version>
  </parent>
  <artifactId>commons-text</artifactId>
  <version>1.10.0</version>
  <properties>
    <maven.compiler.target>1.8</maven.compiler.target>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.apache.commons</groupId>
      <artifactId>commons-lang3</artifactId>
      <version>3.12.0</version>
    </dependency>
    <dependency>
      <artifactId>bare-dependency</artifactId>
    </dependency>
    <dependency>
      <groupId>org.junit.jupiter</groupId>
      <artifactId>junit-jupiter</artifactId>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>org.apache.commons</groupId>
      <artifactId>commons-lang3</artifactId>
      <version>3.12.0</version>
    </dependency>
    <dependency>
      <groupId>ignored</groupId>
      <artifactId>  </artifactId>
    </dependency>
  </dependencies>
</project>
"#;

/// A jar with a manifest and a build descriptor
pub fn maven_jar() -> Vec<u8> {
    zip_archive(&[
        ("META-INF/MANIFEST.MF", MANIFEST),
        (
            "META-INF/maven/org.apache.commons/commons-text/pom.xml",
            POM,
        ),
        ("org/apache/commons/text/StringSubstitutor.class", "\u{1}"),
    ])
}

/// A jar with only a manifest
pub fn plain_jar() -> Vec<u8> {
    zip_archive(&[
        ("META-INF/MANIFEST.MF", MANIFEST),
        ("org/apache/commons/text/StringSubstitutor.class", "\u{1}"),
    ])
}
