//! Where artifacts come from: directories on disk and compressed application packages

use crate::common::{path_to_string, AnalysisError};
use crate::sniff::is_zip_signature;
use glob::MatchOptions;
use std::io::Read;
use std::path::{Path, PathBuf};

/// File extensions considered when enumerating an application directory
pub const ARTIFACT_EXTENSIONS: &[&str] = &["dll", "exe", "jar"];

/// Every file below `root` with one of the [`ARTIFACT_EXTENSIONS`], case-insensitively, sorted
pub fn enumerate_artifacts<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>, AnalysisError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(AnalysisError::InvalidInput(format!(
            "{} is not a directory",
            path_to_string(root)
        )));
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let base = glob::Pattern::escape(&path_to_string(root));
    let mut paths = Vec::new();
    for extension in ARTIFACT_EXTENSIONS {
        let pattern = format!("{}/**/*.{}", base, extension);
        for entry in glob::glob_with(&pattern, options)? {
            let path = entry.map_err(|e| AnalysisError::IOError(e.into_error()))?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

const GZIP_SIGNATURE: &[u8] = b"\x1f\x8b";
const SEVEN_ZIP_SIGNATURE: &[u8] = b"7z\xbc\xaf\x27\x1c";
// POSIX and GNU headers both start their magic with "ustar"
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Container formats an application can be shipped in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    SevenZip,
}

impl ArchiveFormat {
    /// Recognise a container from its first bytes
    pub fn detect(magic: &[u8]) -> Option<Self> {
        if is_zip_signature(magic) {
            Some(Self::Zip)
        } else if magic.starts_with(SEVEN_ZIP_SIGNATURE) {
            Some(Self::SevenZip)
        } else if magic.starts_with(GZIP_SIGNATURE) {
            Some(Self::TarGz)
        } else if magic
            .get(TAR_MAGIC_OFFSET..)
            .map_or(false, |m| m.starts_with(TAR_MAGIC))
        {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// A compressed application unpacked into a temporary directory
///
/// The directory and everything in it is removed when the value is dropped.
pub struct StagedArchive {
    dir: tempfile::TempDir,
}

impl StagedArchive {
    /// Unpack a zip, tar, gzipped tar or 7z container, recognised by its content
    pub fn extract<P: AsRef<Path>>(archive: P) -> Result<Self, AnalysisError> {
        Self::extract_in(archive, None)
    }

    /// Like [`StagedArchive::extract`], with the staging directory created below `root`
    pub fn extract_in<P: AsRef<Path>>(
        archive: P,
        root: Option<&Path>,
    ) -> Result<Self, AnalysisError> {
        let archive = archive.as_ref();
        let mut magic = Vec::with_capacity(TAR_MAGIC_OFFSET + TAR_MAGIC.len());
        fs_err::File::open(archive)?
            .take((TAR_MAGIC_OFFSET + TAR_MAGIC.len()) as u64)
            .read_to_end(&mut magic)?;
        let format = ArchiveFormat::detect(&magic).ok_or_else(|| {
            AnalysisError::UnsupportedFormat(format!(
                "{} is not a zip, tar or 7z archive",
                path_to_string(archive)
            ))
        })?;

        let dir = match root {
            Some(root) => tempfile::tempdir_in(root)?,
            None => tempfile::tempdir()?,
        };
        let file = std::io::BufReader::new(fs_err::File::open(archive)?);
        match format {
            ArchiveFormat::Zip => zip::ZipArchive::new(file)?.extract(dir.path())?,
            ArchiveFormat::Tar => tar::Archive::new(file).unpack(dir.path())?,
            ArchiveFormat::TarGz => {
                tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(dir.path())?
            }
            ArchiveFormat::SevenZip => {
                sevenz_rust::decompress_file(archive, dir.path()).map_err(|e| {
                    AnalysisError::ParseFailure(format!(
                        "could not unpack {}: {}",
                        path_to_string(archive),
                        e
                    ))
                })?
            }
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the staging directory, reporting failures instead of ignoring them
    pub fn close(self) -> Result<(), AnalysisError> {
        self.dir.close()?;
        Ok(())
    }
}
