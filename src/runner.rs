use crate::analyser::Analyser;
use crate::artifact::{AnalysedArtifact, ApplicationArtifact, CircularDependency};
use crate::common::AnalysisError;
use crate::cycles::find_cycles;
use crate::graph::assemble_application;
use crate::source::{enumerate_artifacts, StagedArchive};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Every artifact of an application, with the dependents relation filled in
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationReport {
    /// Files the artifacts were read from, relative to the application root, in the same order
    pub files: Vec<PathBuf>,
    pub artifacts: Vec<ApplicationArtifact>,
    /// `None` if cycle detection was disabled
    pub cycles: Option<Vec<CircularDependency>>,
}

impl Analyser {
    /// Analyse a set of files in parallel, keeping their order
    pub fn analyse_files(&self, paths: &[PathBuf]) -> Vec<AnalysedArtifact> {
        paths.par_iter().map(|p| self.analyse_path(p)).collect()
    }

    /// Analyse every artifact below a directory as one application
    pub fn analyse_application<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Result<ApplicationReport, AnalysisError> {
        let root = root.as_ref();
        let paths = enumerate_artifacts(root)?;
        self.sink()
            .info(&format!("analysing {} files", paths.len()));

        // every extraction has finished once this returns
        let analysed = self.analyse_files(&paths);
        let failed = analysed.iter().filter(|a| !a.analysis_succeeded()).count();
        if failed > 0 {
            self.sink()
                .warn(&format!("{} of {} files could not be fully analysed", failed, paths.len()));
        }

        let artifacts = assemble_application(analysed);
        let cycles = if self.config().detect_cycles {
            let cycles = find_cycles(&artifacts);
            for c in &cycles {
                self.sink().warn(&format!("circular dependency: {}", c));
            }
            Some(cycles)
        } else {
            None
        };

        let files = paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
            .collect();
        Ok(ApplicationReport {
            files,
            artifacts,
            cycles,
        })
    }

    /// Unpack a compressed application and analyse it; the staging area is always removed
    pub fn analyse_application_archive<P: AsRef<Path>>(
        &self,
        archive: P,
    ) -> Result<ApplicationReport, AnalysisError> {
        let staged = StagedArchive::extract_in(archive, self.config().staging_root.as_deref())?;
        let report = self.analyse_application(staged.path());
        if let Err(e) = staged.close() {
            self.sink()
                .warn(&format!("could not remove staging directory: {}", e));
        }
        report
    }
}
