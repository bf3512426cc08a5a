//! Classification of a byte stream from its headers alone

use crate::common::AnalysisError;
use crate::pe::PeHeaders;
use std::io::{Read, Seek, SeekFrom};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const ZIP_SIGNATURES: [[u8; 4]; 3] = [
    *b"PK\x03\x04", // local file header
    *b"PK\x05\x06", // end of central directory, empty archive
    *b"PK\x07\x08", // spanned archive
];

/// Structural kind of a stream, as far as dispatching to an extractor is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// PE image with a readable metadata root
    Managed,
    /// PE image with a runtime header over native code, but no readable metadata
    Mixed,
    Native,
    /// Zip container with a JAR manifest
    JavaArchive,
    /// Readable, but not something this crate analyses
    Unsupported(String),
}

pub fn is_zip_signature(magic: &[u8]) -> bool {
    ZIP_SIGNATURES.iter().any(|sig| magic.starts_with(sig))
}

/// Classify the stream starting at its current position
///
/// Only headers are read. The stream position is restored before returning, whatever the
/// outcome. Corrupt input is reported as an error, unknown formats as [`Sniffed::Unsupported`].
pub fn sniff<R: Read + Seek>(reader: &mut R) -> Result<Sniffed, AnalysisError> {
    let start = reader.stream_position()?;
    let result = sniff_from(reader, start);
    reader.seek(SeekFrom::Start(start))?;
    result
}

fn sniff_from<R: Read + Seek>(reader: &mut R, start: u64) -> Result<Sniffed, AnalysisError> {
    let mut magic = Vec::with_capacity(4);
    reader.by_ref().take(4).read_to_end(&mut magic)?;
    reader.seek(SeekFrom::Start(start))?;

    if magic.is_empty() {
        return Err(AnalysisError::InvalidInput("empty stream".to_owned()));
    }
    if is_zip_signature(&magic) {
        return sniff_zip(reader);
    }
    if PeHeaders::has_dos_signature(&magic) {
        return sniff_pe(reader);
    }
    Ok(Sniffed::Unsupported(format!(
        "unrecognised file signature {}",
        hex::encode(&magic)
    )))
}

fn sniff_zip<R: Read + Seek>(reader: &mut R) -> Result<Sniffed, AnalysisError> {
    let archive = zip::ZipArchive::new(reader)?;
    let has_manifest = archive
        .file_names()
        .any(|name| name.eq_ignore_ascii_case(MANIFEST_PATH));
    if has_manifest {
        Ok(Sniffed::JavaArchive)
    } else {
        Ok(Sniffed::Unsupported(
            "zip archive without a JAR manifest".to_owned(),
        ))
    }
}

fn sniff_pe<R: Read + Seek>(reader: &mut R) -> Result<Sniffed, AnalysisError> {
    let headers = PeHeaders::read(reader)?;
    let clr = match headers.read_clr_header(reader)? {
        Some(clr) => clr,
        None => return Ok(Sniffed::Native),
    };
    if headers.has_metadata_root(reader, &clr) {
        Ok(Sniffed::Managed)
    } else if !clr.is_il_only() {
        Ok(Sniffed::Mixed)
    } else {
        Ok(Sniffed::Native)
    }
}
