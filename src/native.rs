//! Extraction of native PE images

use crate::artifact::{AnalysedArtifact, ArtifactKind, Origin};
use crate::common::AnalysisError;
use crate::config::AnalyserConfig;
use crate::diagnostics::DiagnosticSink;
use crate::pe::{PeHeaders, PeImage};
use std::io::Cursor;

/// Guess whether a native executable merely bootstraps a managed application
///
/// The rules are applied in order and the first one that matches decides:
/// a runtime directory is present even though the image was not classified as managed; an
/// import names a managed hosting component; no import names a C or C++ runtime library.
///
/// This is advisory only; a statically linked C runtime is enough to defeat it.
pub fn possible_managed_bootstrapper(
    headers: &PeHeaders,
    dependencies: &[String],
    config: &AnalyserConfig,
) -> bool {
    if headers.clr_directory.is_some() {
        return true;
    }
    let lowercase: Vec<String> = dependencies.iter().map(|d| d.to_lowercase()).collect();
    let imports_any = |tokens: &[String]| {
        tokens.iter().any(|t| {
            let t = t.to_lowercase();
            lowercase.iter().any(|d| d.contains(&t))
        })
    };
    if imports_any(&config.managed_host_tokens) {
        return true;
    }
    !imports_any(&config.native_runtime_tokens)
}

fn read_image(
    image: &[u8],
    origin: Origin,
    config: &AnalyserConfig,
    sink: &dyn DiagnosticSink,
) -> Result<AnalysedArtifact, AnalysisError> {
    let headers = PeHeaders::read(&mut Cursor::new(image))?;
    let pe = PeImage::new(image, sink)?;
    let dependencies = pe.read_dependencies()?;
    let name = pe.read_dll_name().unwrap_or_default();

    if headers.is_dll() {
        return Ok(AnalysedArtifact::new(
            name,
            ArtifactKind::NativeLibrary,
            origin,
            dependencies,
        ));
    }

    let bootstrapper = possible_managed_bootstrapper(&headers, &dependencies, config);
    if bootstrapper {
        sink.info(&format!(
            "{} may be a managed bootstrapper (heuristic)",
            if name.is_empty() { "executable" } else { name.as_str() }
        ));
    }
    Ok(
        AnalysedArtifact::new(name, ArtifactKind::NativeExecutable, origin, dependencies)
            .with_bootstrapper_indicator(bootstrapper),
    )
}

/// Analyse an image the sniffer classified as native or mixed
pub fn extract(
    image: &[u8],
    origin: Origin,
    config: &AnalyserConfig,
    sink: &dyn DiagnosticSink,
) -> AnalysedArtifact {
    read_image(image, origin, config, sink).unwrap_or_else(|e| {
        sink.warn(&format!("could not read PE image: {}", e));
        AnalysedArtifact::invalid(origin, Some(e.to_string()))
    })
}
