//! Extraction of managed (.NET) assemblies

use crate::artifact::{AnalysedArtifact, ArtifactKind, FrameworkInfo, FrameworkVersion, Origin};
use crate::common::AnalysisError;
use crate::config::AnalyserConfig;
use crate::diagnostics::DiagnosticSink;
use crate::pe::PeHeaders;
use dotscope::metadata::customattributes::{CustomAttributeArgument, CustomAttributeValue};
use dotscope::metadata::identity::Identity;
use dotscope::CilObject;
use sha1::{Digest, Sha1};
use std::io::Cursor;
use std::sync::LazyLock;

/// Assemblies whose version tracks the runtime a module was compiled against
const CORE_LIBRARIES: &[&str] = &[
    "System.Runtime",
    "System.Private.CoreLib",
    "netstandard",
    "mscorlib",
];

const FRAMEWORK_DISPLAY_NAME: &str = "FrameworkDisplayName";

// `.NETCoreApp,Version=v8.0`, `.NETFramework,Version=v4.7.2`, `.NETStandard,Version=v2.0`
static FRAMEWORK_NAME_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[.\w]+,Version=v\d+(\.\d+)*").expect("valid framework name regex")
});

/// Last eight bytes of the SHA-1 digest of a public key, in reverse order
pub fn public_key_token(public_key: &[u8]) -> [u8; 8] {
    let digest = Sha1::digest(public_key);
    let mut token = [0u8; 8];
    for (t, d) in token.iter_mut().zip(digest.iter().rev()) {
        *t = *d;
    }
    token
}

/// Name, version, culture and key of an assembly or of a reference to one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: [u32; 4],
    pub culture: Option<String>,
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyIdentity {
    /// `Name, Version=a.b.c.d, Culture=neutral, PublicKeyToken=0123456789abcdef`
    pub fn display_name(&self) -> String {
        let [major, minor, build, revision] = self.version;
        format!(
            "{}, Version={}.{}.{}.{}, Culture={}, PublicKeyToken={}",
            self.name,
            major,
            minor,
            build,
            revision,
            self.culture
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("neutral"),
            self.public_key_token
                .map(hex::encode)
                .unwrap_or_else(|| "null".to_owned())
        )
    }
}

/// Token of an assembly reference, hashing the full key when the reference carries one
fn reference_token(identity: Option<&Identity>) -> Option<[u8; 8]> {
    match identity? {
        Identity::PubKey(key) if !key.is_empty() => Some(public_key_token(key)),
        Identity::Token(token) if *token != 0 => Some(token.to_le_bytes()),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn string_argument(argument: &CustomAttributeArgument) -> Option<&str> {
    match argument {
        CustomAttributeArgument::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Framework name and display name, if the attribute is a `TargetFrameworkAttribute`
///
/// Decoded attribute values do not carry their type, so the attribute is recognised by its
/// signature: a single framework name argument and at most a `FrameworkDisplayName` property.
fn target_framework(attribute: &CustomAttributeValue) -> Option<(String, Option<String>)> {
    if attribute.fixed_args.len() != 1 {
        return None;
    }
    let name = string_argument(&attribute.fixed_args[0])?;
    if !FRAMEWORK_NAME_RE.is_match(name) {
        return None;
    }
    let display_name = attribute
        .named_args
        .iter()
        .find(|arg| arg.name == FRAMEWORK_DISPLAY_NAME)
        .and_then(|arg| string_argument(&arg.value))
        .map(str::to_owned);
    Some((name.to_owned(), display_name))
}

struct Manifest {
    name: String,
    has_entry_point: bool,
    references: Vec<String>,
    framework_info: Option<FrameworkInfo>,
    target_version: Option<FrameworkVersion>,
}

fn read_manifest(image: &[u8]) -> Result<Manifest, AnalysisError> {
    let mut cursor = Cursor::new(image);
    let headers = PeHeaders::read(&mut cursor)?;
    let clr = headers
        .read_clr_header(&mut cursor)?
        .ok_or_else(|| AnalysisError::InvalidInput("no runtime header".to_owned()))?;

    let cil = CilObject::from_mem(image.to_vec())?;
    let assembly = cil.assembly().ok_or_else(|| {
        AnalysisError::ParseFailure("module without an assembly manifest".to_owned())
    })?;
    let identity = AssemblyIdentity {
        name: assembly.name.clone(),
        version: [
            u32::from(assembly.major_version),
            u32::from(assembly.minor_version),
            u32::from(assembly.build_number),
            u32::from(assembly.revision_number),
        ],
        culture: assembly.culture.clone(),
        public_key_token: assembly
            .public_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(public_key_token),
    };

    // keyed by token, so in table order
    let references: Vec<AssemblyIdentity> = cil
        .refs_assembly()
        .iter()
        .map(|entry| {
            let r = entry.value();
            AssemblyIdentity {
                name: r.name.clone(),
                version: [
                    u32::from(r.major_version),
                    u32::from(r.minor_version),
                    u32::from(r.build_number),
                    u32::from(r.revision_number),
                ],
                culture: r.culture.clone(),
                public_key_token: reference_token(r.identifier.as_ref()),
            }
        })
        .collect();

    let framework_info = assembly
        .custom_attributes
        .iter()
        .find_map(|(_, attribute)| target_framework(attribute))
        .and_then(|(name, display_name)| {
            FrameworkInfo::new(display_name, FrameworkVersion::parse(&name))
        });
    let target_version = framework_info
        .as_ref()
        .and_then(|f| f.version)
        .or_else(|| core_library_version(&references));

    Ok(Manifest {
        name: identity.display_name(),
        has_entry_point: clr.entry_point_token != 0,
        references: references.iter().map(AssemblyIdentity::display_name).collect(),
        framework_info,
        target_version,
    })
}

fn core_library_version(references: &[AssemblyIdentity]) -> Option<FrameworkVersion> {
    references
        .iter()
        .find(|r| CORE_LIBRARIES.iter().any(|c| r.name.eq_ignore_ascii_case(c)))
        .map(|r| FrameworkVersion::new(r.version[0], r.version[1]))
}

/// Analyse an image the sniffer classified as managed
///
/// A target runtime newer than [`AnalyserConfig::max_runtime_version`] is not fatal: the
/// artifact is reported as unsupported but keeps its name and framework information.
pub fn extract(
    image: &[u8],
    config: &AnalyserConfig,
    sink: &dyn DiagnosticSink,
) -> AnalysedArtifact {
    let manifest = match read_manifest(image) {
        Ok(manifest) => manifest,
        Err(e) => {
            sink.warn(&format!("could not read assembly metadata: {}", e));
            return AnalysedArtifact::invalid(Origin::Managed, Some(e.to_string()));
        }
    };

    if let (Some(target), Some(supported)) = (manifest.target_version, config.max_runtime_version)
    {
        if target > supported {
            let e = AnalysisError::VersionMismatch { target, supported };
            sink.warn(&format!("{}: {}", manifest.name, e));
            return AnalysedArtifact::new(
                manifest.name,
                ArtifactKind::Unsupported,
                Origin::Managed,
                Vec::new(),
            )
            .with_failure(Some(e.to_string()))
            .with_framework_info(manifest.framework_info);
        }
    }

    let kind = if manifest.has_entry_point {
        ArtifactKind::ManagedExecutable
    } else {
        ArtifactKind::ManagedLibrary
    };
    sink.debug(&format!(
        "{}: {} assembly references",
        manifest.name,
        manifest.references.len()
    ));
    AnalysedArtifact::new(manifest.name, kind, Origin::Managed, manifest.references)
        .with_framework_info(manifest.framework_info)
}
