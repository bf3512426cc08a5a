//! Parameters of an analysis run

use crate::artifact::FrameworkVersion;
use std::path::PathBuf;

/// Module name fragments that indicate an executable hosting the managed runtime
/// (host resolver, host policy, core runtime)
pub const DEFAULT_MANAGED_HOST_TOKENS: &[&str] = &["hostfxr", "hostpolicy", "coreclr"];

/// Module name fragments of the C and C++ runtime libraries
pub const DEFAULT_NATIVE_RUNTIME_TOKENS: &[&str] = &[
    "vcruntime",
    "msvcp",
    "msvcr",
    "ucrtbase",
    "api-ms-win-crt",
    "libstdc++",
    "libgcc",
];

#[derive(Clone, Debug)]
pub struct AnalyserConfig {
    /// Newest target framework the analyser accepts; managed artifacts targeting a newer one are
    /// reported with a version mismatch. `None` accepts everything.
    pub max_runtime_version: Option<FrameworkVersion>,
    /// Imports containing one of these (case-insensitively) flag a possible managed bootstrapper
    pub managed_host_tokens: Vec<String>,
    /// An executable importing none of these is flagged as a possible managed bootstrapper
    pub native_runtime_tokens: Vec<String>,
    /// Look for circular dependencies after assembling an application
    pub detect_cycles: bool,
    /// Where packed applications are unpacked; the system temporary directory if `None`
    pub staging_root: Option<PathBuf>,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            max_runtime_version: None,
            managed_host_tokens: DEFAULT_MANAGED_HOST_TOKENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            native_runtime_tokens: DEFAULT_NATIVE_RUNTIME_TOKENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            detect_cycles: true,
            staging_root: None,
        }
    }
}

impl AnalyserConfig {
    pub fn with_max_runtime_version(mut self, version: FrameworkVersion) -> Self {
        self.max_runtime_version = Some(version);
        self
    }
}
