use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

/// Opaque identity of an analysed artifact, unique per analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What an artifact is, as far as dependency analysis is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    ManagedLibrary,
    ManagedExecutable,
    NativeLibrary,
    NativeExecutable,
    JavaArchive,
    Unsupported,
    Invalid,
}

/// Broad execution model of an artifact, independent of its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Origin {
    /// Pure IL assembly
    Managed,
    /// Machine code only (probably C/C++)
    Native,
    /// Machine code with a runtime header (C++/CLI), or a suspected managed bootstrapper
    Mixed,
    Java,
    Unknown,
}

/// Major and minor number of a target framework (e.g. 4.7, 8.0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
}

static VERSION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(\d+)(?:\.(\d+))?").expect("valid version regex"));

impl FrameworkVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Extract the first `major[.minor]` number found in a framework or version string
    ///
    /// `.NETCoreApp,Version=v8.0` gives 8.0, `4.7.2` gives 4.7, `net10` gives 10.0
    pub fn parse(s: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(s)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor })
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Target framework metadata of a managed artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkInfo {
    /// Human readable framework name (e.g. ".NET 8.0")
    pub display_name: Option<String>,
    pub version: Option<FrameworkVersion>,
}

impl FrameworkInfo {
    /// `None` unless at least one of the two fields carries a value
    pub fn new(display_name: Option<String>, version: Option<FrameworkVersion>) -> Option<Self> {
        let display_name = display_name.filter(|d| !d.trim().is_empty());
        if display_name.is_none() && version.is_none() {
            None
        } else {
            Some(Self {
                display_name,
                version,
            })
        }
    }
}

/// Coordinates of a Java archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JavaMetadata {
    pub group_id: Option<String>,
    pub version: Option<String>,
    /// `maven.compiler.target` of the build descriptor
    pub compiler_version: Option<u32>,
    /// A build descriptor was found; only then are dependencies known
    pub is_maven: bool,
}

/// Result of analysing one binary
///
/// Built once by an extractor and never modified afterwards. Two artifacts compare equal only
/// if they share the same identity, regardless of their names.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysedArtifact {
    id: ArtifactId,
    name: String,
    kind: ArtifactKind,
    origin: Origin,
    dependencies: Vec<String>,
    analysis_succeeded: bool,
    /// Only ever set on native executables, see [`AnalysedArtifact::possible_managed_bootstrapper`]
    possible_managed_bootstrapper: bool,
    framework_info: Option<FrameworkInfo>,
    analysis_error: Option<String>,
    java: Option<JavaMetadata>,
}

impl AnalysedArtifact {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        origin: Origin,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            name: name.into(),
            kind,
            origin,
            dependencies,
            analysis_succeeded: true,
            possible_managed_bootstrapper: false,
            framework_info: None,
            analysis_error: None,
            java: None,
        }
    }

    /// Artifact that could not be analysed at all
    pub(crate) fn failed(kind: ArtifactKind, origin: Origin, error: Option<String>) -> Self {
        Self::new("", kind, origin, Vec::new()).with_failure(error)
    }

    pub(crate) fn unsupported(error: Option<String>) -> Self {
        Self::failed(ArtifactKind::Unsupported, Origin::Unknown, error)
    }

    pub(crate) fn invalid(origin: Origin, error: Option<String>) -> Self {
        Self::failed(ArtifactKind::Invalid, origin, error)
    }

    /// `Invalid` or `Unsupported` artifact, depending on what went wrong
    pub(crate) fn from_error(origin: Origin, error: &crate::common::AnalysisError) -> Self {
        if error.is_invalid_input() {
            Self::invalid(origin, Some(error.to_string()))
        } else {
            Self::failed(ArtifactKind::Unsupported, origin, Some(error.to_string()))
        }
    }

    pub(crate) fn with_failure(mut self, error: Option<String>) -> Self {
        self.analysis_succeeded = false;
        self.analysis_error = error;
        self
    }

    pub(crate) fn with_framework_info(mut self, framework_info: Option<FrameworkInfo>) -> Self {
        self.framework_info = framework_info;
        self
    }

    pub(crate) fn with_java(mut self, java: JavaMetadata) -> Self {
        self.java = Some(java);
        self
    }

    /// Record the bootstrapper heuristic; a suspected bootstrapper is no longer purely native
    ///
    /// Ignored unless the artifact is a native executable.
    pub(crate) fn with_bootstrapper_indicator(mut self, indicator: bool) -> Self {
        self.possible_managed_bootstrapper =
            indicator && self.kind == ArtifactKind::NativeExecutable;
        if self.possible_managed_bootstrapper && self.origin == Origin::Native {
            self.origin = Origin::Mixed;
        }
        self
    }

    pub(crate) fn with_name_if_empty(mut self, name: impl Into<String>) -> Self {
        if self.name.is_empty() {
            self.name = name.into();
        }
        self
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Declared module name; empty if unknown
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Names of the modules this artifact requires, in discovery order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn analysis_succeeded(&self) -> bool {
        self.analysis_succeeded
    }

    /// Advisory guess that this native executable only bootstraps a managed application
    ///
    /// This is a heuristic over the import table. Do not base correctness-critical decisions
    /// on it.
    pub fn possible_managed_bootstrapper(&self) -> bool {
        self.kind == ArtifactKind::NativeExecutable && self.possible_managed_bootstrapper
    }

    pub fn framework_info(&self) -> Option<&FrameworkInfo> {
        self.framework_info.as_ref()
    }

    pub fn analysis_error(&self) -> Option<&str> {
        self.analysis_error.as_deref()
    }

    pub fn java(&self) -> Option<&JavaMetadata> {
        self.java.as_ref()
    }
}

impl PartialEq for AnalysedArtifact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnalysedArtifact {}

impl std::hash::Hash for AnalysedArtifact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl AsRef<AnalysedArtifact> for AnalysedArtifact {
    fn as_ref(&self) -> &AnalysedArtifact {
        self
    }
}

/// An analysed artifact placed in the context of a whole application
///
/// The dependents are filled in by [`crate::assemble_application`] once every artifact of the
/// application is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationArtifact {
    #[serde(flatten)]
    artifact: AnalysedArtifact,
    dependents: Vec<String>,
}

impl ApplicationArtifact {
    pub fn artifact(&self) -> &AnalysedArtifact {
        &self.artifact
    }

    /// Names of the artifacts in the same application that depend on this one
    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    // only the graph assembler may call this
    pub(crate) fn add_dependent(&mut self, name: &str) {
        if !self.dependents.iter().any(|d| d == name) {
            self.dependents.push(name.to_owned());
        }
    }
}

impl From<AnalysedArtifact> for ApplicationArtifact {
    fn from(artifact: AnalysedArtifact) -> Self {
        Self {
            artifact,
            dependents: Vec::new(),
        }
    }
}

impl std::ops::Deref for ApplicationArtifact {
    type Target = AnalysedArtifact;

    fn deref(&self) -> &AnalysedArtifact {
        &self.artifact
    }
}

impl AsRef<AnalysedArtifact> for ApplicationArtifact {
    fn as_ref(&self) -> &AnalysedArtifact {
        &self.artifact
    }
}

/// A chain of artifact names where each depends on the next and the last on the first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CircularDependency {
    pub chain: Vec<String>,
}

impl fmt::Display for CircularDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.chain {
            write!(f, "{} -> ", name)?;
        }
        match self.chain.first() {
            Some(first) => write!(f, "{}", first),
            None => Ok(()),
        }
    }
}
