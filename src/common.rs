use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The header is not one this crate knows how to read. Not a defect of the input.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Empty, truncated or otherwise corrupt input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The artifact targets a newer runtime than the analyser accepts
    #[error("Target runtime {target} is newer than the supported runtime {supported}")]
    VersionMismatch {
        target: crate::artifact::FrameworkVersion,
        supported: crate::artifact::FrameworkVersion,
    },

    /// The input reached a parser but was rejected by it
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    GoblinError(#[from] goblin::error::Error),
    #[error(transparent)]
    PEError(#[from] pelite::Error),
    #[error(transparent)]
    MetadataError(#[from] dotscope::Error),
    #[error(transparent)]
    ZipError(#[from] zip::result::ZipError),
    #[error(transparent)]
    XmlError(#[from] roxmltree::Error),
    #[error(transparent)]
    PatternError(#[from] glob::PatternError),
}

impl AnalysisError {
    /// Whether the input should be reported as `Invalid` rather than `Unsupported`
    pub fn is_invalid_input(&self) -> bool {
        !matches!(
            self,
            AnalysisError::UnsupportedFormat(_) | AnalysisError::VersionMismatch { .. }
        )
    }
}

/// Last component of a path, lossily converted, or an empty string
pub fn file_name_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn path_to_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().to_string_lossy().into_owned()
}
