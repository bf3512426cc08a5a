//! Classify compiled artifacts (managed assemblies, native PE images, Java archives) and map
//! the dependencies between the artifacts of one application.

mod analyser;
mod cycles;
mod graph;
mod runner;

pub mod artifact;
pub mod common;
pub mod config;
pub mod diagnostics;
pub mod java;
pub mod managed;
pub mod native;
pub mod pe;
pub mod sniff;
pub mod source;

#[cfg(test)]
mod fixtures;

pub use analyser::Analyser;
pub use artifact::{
    AnalysedArtifact, ApplicationArtifact, ArtifactId, ArtifactKind, CircularDependency,
    FrameworkInfo, FrameworkVersion, JavaMetadata, Origin,
};
pub use common::{file_name_string, path_to_string, AnalysisError};
pub use config::AnalyserConfig;
pub use cycles::find_cycles;
pub use diagnostics::{DiagnosticSink, Level, MemorySink, NullSink, TracingSink};
pub use graph::assemble_application;
pub use runner::ApplicationReport;

use std::io::{Read, Seek};

/// Classify a stream and extract its dependencies with the default configuration
pub fn classify_and_extract<R: Read + Seek>(reader: &mut R) -> AnalysedArtifact {
    Analyser::default().classify_and_extract(reader)
}
