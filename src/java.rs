//! Extraction of Java archives
//!
//! Dependencies are only known when the archive embeds its Maven build descriptor. Otherwise
//! the manifest gives a title and a version at best.

use crate::artifact::{AnalysedArtifact, ArtifactKind, JavaMetadata, Origin};
use crate::common::AnalysisError;
use crate::diagnostics::DiagnosticSink;
use crate::sniff::MANIFEST_PATH;
use std::io::{Read, Seek};
use zip::ZipArchive;

const BUILD_DESCRIPTOR: &str = "pom.xml";
const MANIFEST_TITLE: &str = "Implementation-Title";
const MANIFEST_VERSION: &str = "Implementation-Version";

fn is_build_descriptor(entry: &str) -> bool {
    entry.rsplit('/').next().map(|f| f.eq_ignore_ascii_case(BUILD_DESCRIPTOR)) == Some(true)
}

/// Render a dependency the way it is matched against artifact names:
/// `artifactId (groupId, version)`, leaving out what is unknown
pub fn dependency_name(artifact_id: &str, group_id: Option<&str>, version: Option<&str>) -> String {
    let qualifiers: Vec<&str> = [group_id, version]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect();
    if qualifiers.is_empty() {
        artifact_id.to_owned()
    } else {
        format!("{} ({})", artifact_id, qualifiers.join(", "))
    }
}

/// `maven.compiler.target` as a number; `1.8` is Java 8
fn parse_compiler_version(s: &str) -> Option<u32> {
    let s = s.trim();
    s.strip_prefix("1.").unwrap_or(s).parse().ok()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Project {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    compiler_version: Option<u32>,
    dependencies: Vec<String>,
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.has_tag_name(name))
}

fn child_text(node: roxmltree::Node, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn parse_pom(text: &str) -> Result<Project, AnalysisError> {
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();
    if !root.has_tag_name("project") {
        return Err(AnalysisError::ParseFailure(format!(
            "build descriptor root is <{}>, not <project>",
            root.tag_name().name()
        )));
    }
    let parent = child(root, "parent");
    let inherited = |name: &str| child_text(root, name).or_else(|| parent.and_then(|p| child_text(p, name)));

    let mut dependencies: Vec<String> = Vec::new();
    for dependency in root.descendants().filter(|n| n.has_tag_name("dependency")) {
        let artifact_id = match child_text(dependency, "artifactId") {
            Some(a) => a,
            None => continue,
        };
        let name = dependency_name(
            &artifact_id,
            child_text(dependency, "groupId").as_deref(),
            child_text(dependency, "version").as_deref(),
        );
        if !dependencies.contains(&name) {
            dependencies.push(name);
        }
    }

    Ok(Project {
        group_id: inherited("groupId"),
        artifact_id: child_text(root, "artifactId"),
        version: inherited("version"),
        compiler_version: root
            .descendants()
            .find(|n| n.has_tag_name("maven.compiler.target"))
            .and_then(|n| n.text())
            .and_then(parse_compiler_version),
        dependencies,
    })
}

/// Attributes of the main section of a JAR manifest, in file order
fn parse_manifest(text: &str) -> Vec<(String, String)> {
    let mut attributes: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(continuation) = line.strip_prefix(' ') {
            if let Some((_, value)) = attributes.last_mut() {
                value.push_str(continuation);
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            attributes.push((key.trim().to_owned(), value.trim_start().to_owned()));
        }
    }
    attributes
}

fn manifest_value(attributes: &[(String, String)], key: &str) -> Option<String> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, AnalysisError> {
    let mut entry = archive.by_name(name)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(String::from_utf8_lossy(&content).into_owned())
}

fn read_archive<R: Read + Seek>(
    reader: R,
    sink: &dyn DiagnosticSink,
) -> Result<AnalysedArtifact, AnalysisError> {
    let mut archive = ZipArchive::new(reader)?;
    let manifest = archive
        .file_names()
        .find(|n| n.eq_ignore_ascii_case(MANIFEST_PATH))
        .map(str::to_owned)
        .ok_or_else(|| AnalysisError::UnsupportedFormat("zip archive without a JAR manifest".to_owned()))?;
    let descriptor = archive
        .file_names()
        .find(|n| is_build_descriptor(n))
        .map(str::to_owned);

    if let Some(descriptor) = descriptor {
        sink.debug(&format!("reading build descriptor {}", descriptor));
        let project = parse_pom(&read_entry(&mut archive, &descriptor)?)?;
        return Ok(AnalysedArtifact::new(
            project.artifact_id.unwrap_or_default(),
            ArtifactKind::JavaArchive,
            Origin::Java,
            project.dependencies,
        )
        .with_java(JavaMetadata {
            group_id: project.group_id,
            version: project.version,
            compiler_version: project.compiler_version,
            is_maven: true,
        }));
    }

    let attributes = parse_manifest(&read_entry(&mut archive, &manifest)?);
    Ok(AnalysedArtifact::new(
        manifest_value(&attributes, MANIFEST_TITLE).unwrap_or_default(),
        ArtifactKind::JavaArchive,
        Origin::Java,
        Vec::new(),
    )
    .with_failure(Some(
        "no build descriptor in the archive, dependencies are unknown".to_owned(),
    ))
    .with_java(JavaMetadata {
        group_id: None,
        version: manifest_value(&attributes, MANIFEST_VERSION),
        compiler_version: None,
        is_maven: false,
    }))
}

/// Analyse a zip container the sniffer classified as a Java archive
pub fn extract<R: Read + Seek>(reader: R, sink: &dyn DiagnosticSink) -> AnalysedArtifact {
    read_archive(reader, sink).unwrap_or_else(|e| {
        sink.warn(&format!("could not read Java archive: {}", e));
        AnalysedArtifact::from_error(Origin::Java, &e)
    })
}
