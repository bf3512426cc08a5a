//! Low-level PE file format access
//!
//! [`PeHeaders`] walks the headers of a seekable stream without reading the payload; this is
//! all the format sniffer needs. [`PeImage`] wraps a fully read image with the goblin and
//! pelite parsers for the import and export directories.

use crate::common::AnalysisError;
use crate::diagnostics::DiagnosticSink;
use dataview::DataView;
use std::io::{Read, Seek, SeekFrom};

const DOS_HEADER_SIZE: usize = 64;
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const CLR_HEADER_SIZE: usize = 72;
// the loader refuses images with more sections than this
const MAX_SECTIONS: u16 = 96;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const IMAGE_FILE_DLL: u16 = 0x2000;
const IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR: usize = 14;
const COMIMAGE_FLAGS_ILONLY: u32 = 0x1;

/// "BSJB", first four bytes of an ECMA-335 metadata root
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

pub(crate) fn read_u16(view: &DataView, offset: usize) -> Result<u16, AnalysisError> {
    view.try_read::<u16>(offset)
        .map(u16::from_le)
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u32(view: &DataView, offset: usize) -> Result<u32, AnalysisError> {
    view.try_read::<u32>(offset)
        .map(u32::from_le)
        .ok_or_else(|| truncated(offset))
}

fn truncated(offset: usize) -> AnalysisError {
    AnalysisError::InvalidInput(format!("data truncated at offset {:#x}", offset))
}

/// Read exactly `len` bytes at `base + offset`
fn read_at<R: Read + Seek>(
    reader: &mut R,
    base: u64,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, AnalysisError> {
    reader.seek(SeekFrom::Start(base + offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => truncated(offset as usize),
        _ => AnalysisError::IOError(e),
    })?;
    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.rva != 0 && self.size != 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

/// The parts of the NT headers that classification depends on
#[derive(Debug, Clone)]
pub struct PeHeaders {
    /// Stream position of the DOS header
    pub base: u64,
    pub characteristics: u16,
    pub is_64: bool,
    pub clr_directory: Option<DataDirectory>,
    pub sections: Vec<SectionHeader>,
}

/// Runtime (COR20) header of a managed or mixed image
#[derive(Debug, Clone, Copy)]
pub struct ClrHeader {
    pub metadata: DataDirectory,
    pub flags: u32,
    pub entry_point_token: u32,
}

impl ClrHeader {
    pub fn is_il_only(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_ILONLY != 0
    }
}

impl PeHeaders {
    /// Whether the stream starts with the MZ signature
    pub fn has_dos_signature(magic: &[u8]) -> bool {
        magic.len() >= 2 && &magic[..2] == b"MZ"
    }

    /// Parse DOS, COFF and optional headers plus the section table, starting at the current
    /// stream position. Leaves the stream position undefined.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, AnalysisError> {
        let base = reader.stream_position()?;

        let dos = read_at(reader, base, 0, DOS_HEADER_SIZE)?;
        if !Self::has_dos_signature(&dos) {
            return Err(AnalysisError::UnsupportedFormat(
                "missing MZ signature".to_owned(),
            ));
        }
        let e_lfanew = read_u32(DataView::from(&dos[..]), 0x3c)? as u64;

        let nt = read_at(reader, base, e_lfanew, 4 + COFF_HEADER_SIZE)?;
        if &nt[..4] != b"PE\0\0" {
            return Err(AnalysisError::InvalidInput(
                "MZ image without a PE signature".to_owned(),
            ));
        }
        let coff = DataView::from(&nt[4..]);
        let number_of_sections = read_u16(coff, 2)?;
        let size_of_optional_header = read_u16(coff, 16)? as usize;
        let characteristics = read_u16(coff, 18)?;
        if number_of_sections > MAX_SECTIONS {
            return Err(AnalysisError::InvalidInput(format!(
                "implausible number of sections: {}",
                number_of_sections
            )));
        }

        let optional_offset = e_lfanew + 4 + COFF_HEADER_SIZE as u64;
        let optional = read_at(reader, base, optional_offset, size_of_optional_header)?;
        let optional = DataView::from(&optional[..]);
        let (is_64, rva_count_offset) = match read_u16(optional, 0)? {
            PE32_MAGIC => (false, 92),
            PE32_PLUS_MAGIC => (true, 108),
            magic => {
                return Err(AnalysisError::InvalidInput(format!(
                    "unknown optional header magic {:#x}",
                    magic
                )))
            }
        };
        let number_of_rva_and_sizes = read_u32(optional, rva_count_offset)? as usize;
        let clr_directory = if number_of_rva_and_sizes > IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR {
            let entry = rva_count_offset + 4 + IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR * 8;
            let dd = DataDirectory {
                rva: read_u32(optional, entry)?,
                size: read_u32(optional, entry + 4)?,
            };
            Some(dd).filter(DataDirectory::is_present)
        } else {
            None
        };

        let section_table = read_at(
            reader,
            base,
            optional_offset + size_of_optional_header as u64,
            number_of_sections as usize * SECTION_HEADER_SIZE,
        )?;
        let section_table = DataView::from(&section_table[..]);
        let sections = (0..number_of_sections as usize)
            .map(|i| {
                let o = i * SECTION_HEADER_SIZE;
                Ok(SectionHeader {
                    virtual_size: read_u32(section_table, o + 8)?,
                    virtual_address: read_u32(section_table, o + 12)?,
                    size_of_raw_data: read_u32(section_table, o + 16)?,
                    pointer_to_raw_data: read_u32(section_table, o + 20)?,
                })
            })
            .collect::<Result<Vec<_>, AnalysisError>>()?;

        Ok(Self {
            base,
            characteristics,
            is_64,
            clr_directory,
            sections,
        })
    }

    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }

    /// File offset (relative to the DOS header) of a relative virtual address
    pub fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        self.sections.iter().find_map(|s| {
            let end = s
                .virtual_address
                .saturating_add(s.virtual_size.max(s.size_of_raw_data));
            if rva >= s.virtual_address && rva < end {
                Some((rva - s.virtual_address) as u64 + s.pointer_to_raw_data as u64)
            } else {
                None
            }
        })
    }

    /// Read the runtime header, if the image declares one
    pub fn read_clr_header<R: Read + Seek>(
        &self,
        reader: &mut R,
    ) -> Result<Option<ClrHeader>, AnalysisError> {
        let dir = match self.clr_directory {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let offset = self.rva_to_offset(dir.rva).ok_or_else(|| {
            AnalysisError::InvalidInput(format!(
                "runtime header RVA {:#x} outside of any section",
                dir.rva
            ))
        })?;
        let raw = read_at(reader, self.base, offset, CLR_HEADER_SIZE)?;
        let view = DataView::from(&raw[..]);
        Ok(Some(ClrHeader {
            metadata: DataDirectory {
                rva: read_u32(view, 8)?,
                size: read_u32(view, 12)?,
            },
            flags: read_u32(view, 16)?,
            entry_point_token: read_u32(view, 20)?,
        }))
    }

    /// Whether the metadata directory of the runtime header points at a readable metadata root
    pub fn has_metadata_root<R: Read + Seek>(&self, reader: &mut R, clr: &ClrHeader) -> bool {
        if !clr.metadata.is_present() {
            return false;
        }
        match self.rva_to_offset(clr.metadata.rva) {
            Some(offset) => read_at(reader, self.base, offset, 4)
                .and_then(|sig| read_u32(DataView::from(&sig[..]), 0))
                .map(|sig| sig == METADATA_SIGNATURE)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// A PE image held in memory, accessed through the goblin and pelite libraries
pub struct PeImage<'a> {
    pefile: Option<pelite::PeFile<'a>>,
    peobject: Option<goblin::pe::PE<'a>>,
}

impl<'a> PeImage<'a> {
    pub fn new(content: &'a [u8], sink: &dyn DiagnosticSink) -> Result<Self, AnalysisError> {
        let pefile = match pelite::PeFile::from_bytes(content) {
            Ok(pef) => Some(pef),
            Err(e) => {
                match e {
                    pelite::Error::BadMagic | pelite::Error::PeMagic => {
                        sink.debug(&format!("pelite: wrong file format ({})", e))
                    }
                    _ => sink.debug(&format!("pelite: {}", e)),
                };
                None
            }
        };
        let peobject = match goblin::Object::parse(content) {
            Ok(goblin::Object::PE(pe)) => Some(pe),
            Ok(_) => {
                sink.debug("goblin: unexpected executable format");
                None
            }
            Err(e) => {
                sink.debug(&format!("goblin: {}", e));
                None
            }
        };

        if pefile.is_none() && peobject.is_none() {
            return Err(AnalysisError::ParseFailure(
                "neither PE parser accepted the image".to_owned(),
            ));
        }
        Ok(Self { pefile, peobject })
    }

    /// Read the DLL name as specified in the export directory
    ///
    /// This should match the dependency name specified in the import table of the files
    /// depending on this DLL
    pub fn read_dll_name(&self) -> Option<String> {
        // prefer goblin since it seems to be less fragile
        if let Some(name) = self.peobject.as_ref().and_then(|peo| peo.name) {
            return Some(name.to_owned());
        }
        let pefile = self.pefile?;
        let exports = pefile.exports().ok()?;
        exports.dll_name().ok().map(|n| n.to_string())
    }

    /// Read the names of the DLLs this executable depends on, without duplicates, in import
    /// directory order
    pub fn read_dependencies(&self) -> Result<Vec<String>, AnalysisError> {
        // prefer goblin since it seems to be less fragile
        if let Some(peo) = self.peobject.as_ref() {
            let names = peo
                .imports
                .iter()
                .map(|i| i.dll)
                .chain(peo.libraries.iter().copied());
            return Ok(dedup_preserving_order(names));
        }

        let pefile = self.pefile.ok_or_else(|| {
            AnalysisError::ParseFailure("no parser available for the import directory".to_owned())
        })?;

        // there is no import directory, e.g. in case of a resource-only DLL
        let imports = match pefile.imports() {
            Ok(imports) => imports,
            Err(pelite::Error::Null) => return Ok(Vec::new()),
            Err(e) => return Err(AnalysisError::PEError(e)),
        };

        let names: Vec<&pelite::util::CStr> = imports
            .iter()
            .map(|desc| desc.dll_name())
            .collect::<Result<Vec<&pelite::util::CStr>, pelite::Error>>()?;

        Ok(dedup_preserving_order(
            names.iter().filter_map(|s| s.to_str().ok()),
        ))
    }
}

fn dedup_preserving_order<'s>(names: impl Iterator<Item = &'s str>) -> Vec<String> {
    let mut ret: Vec<String> = Vec::new();
    for name in names {
        if !ret.iter().any(|n| n == name) {
            ret.push(name.to_owned());
        }
    }
    ret
}
