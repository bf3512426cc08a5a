use crate::artifact::{AnalysedArtifact, ArtifactKind, Origin};
use crate::common::{file_name_string, path_to_string, AnalysisError};
use crate::config::AnalyserConfig;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::sniff::{sniff, Sniffed};
use crate::{java, managed, native};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Entry point for analysing single artifacts
///
/// Holds the configuration and the diagnostic sink shared by every extractor. Analysis never
/// fails: problems are reported through the kind and error message of the returned artifact.
#[derive(Clone)]
pub struct Analyser {
    config: AnalyserConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new(AnalyserConfig::default())
    }
}

impl Analyser {
    /// An analyser reporting through `tracing`
    pub fn new(config: AnalyserConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: AnalyserConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    /// Classify the stream from its headers and run the matching extractor
    ///
    /// The stream is read from its current position, which is restored afterwards.
    pub fn classify_and_extract<R: Read + Seek>(&self, reader: &mut R) -> AnalysedArtifact {
        let start = match reader.stream_position() {
            Ok(start) => start,
            Err(e) => return AnalysedArtifact::from_error(Origin::Unknown, &e.into()),
        };
        let artifact = self.dispatch(reader);
        if let Err(e) = reader.seek(SeekFrom::Start(start)) {
            self.sink.warn(&format!("could not rewind stream: {}", e));
        }
        artifact
    }

    fn dispatch<R: Read + Seek>(&self, reader: &mut R) -> AnalysedArtifact {
        let sniffed = match sniff(reader) {
            Ok(sniffed) => sniffed,
            Err(e) => {
                self.sink.warn(&format!("could not classify stream: {}", e));
                return AnalysedArtifact::from_error(Origin::Unknown, &e);
            }
        };
        self.sink.debug(&format!("stream classified as {:?}", sniffed));

        let origin = match sniffed {
            Sniffed::Unsupported(reason) => return AnalysedArtifact::unsupported(Some(reason)),
            Sniffed::JavaArchive => return java::extract(&mut *reader, self.sink()),
            Sniffed::Managed => Origin::Managed,
            Sniffed::Mixed => Origin::Mixed,
            Sniffed::Native => Origin::Native,
        };

        let mut image = Vec::new();
        if let Err(e) = reader.read_to_end(&mut image) {
            let e = AnalysisError::from(e);
            self.sink.warn(&format!("could not read image: {}", e));
            return AnalysedArtifact::from_error(origin, &e);
        }
        match origin {
            Origin::Managed => managed::extract(&image, &self.config, self.sink()),
            _ => native::extract(&image, origin, &self.config, self.sink()),
        }
    }

    pub fn analyse_bytes(&self, bytes: &[u8]) -> AnalysedArtifact {
        self.classify_and_extract(&mut std::io::Cursor::new(bytes))
    }

    /// Analyse a file on disk
    ///
    /// A native module that does not declare its own name is named after its file.
    pub fn analyse_path<P: AsRef<Path>>(&self, path: P) -> AnalysedArtifact {
        let path = path.as_ref();
        let file = match fs_err::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                self.sink.warn(&e.to_string());
                return AnalysedArtifact::invalid(Origin::Unknown, Some(e.to_string()));
            }
        };
        self.sink.debug(&format!("analysing {}", path_to_string(path)));
        let artifact = self.classify_and_extract(&mut std::io::BufReader::new(file));
        match artifact.kind() {
            ArtifactKind::NativeLibrary | ArtifactKind::NativeExecutable => {
                artifact.with_name_if_empty(file_name_string(path))
            }
            _ => artifact,
        }
    }
}
