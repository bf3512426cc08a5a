use crate::artifact::{AnalysedArtifact, ApplicationArtifact};
use multimap::MultiMap;

/// Place every artifact in the context of the whole set and compute its dependents
///
/// The dependents of an artifact are the names of the other artifacts listing its name among
/// their dependencies, compared exactly. Artifacts without a name take part in no edge.
/// Must only be called once every artifact of the application has been extracted.
pub fn assemble_application(artifacts: Vec<AnalysedArtifact>) -> Vec<ApplicationArtifact> {
    let mut application: Vec<ApplicationArtifact> =
        artifacts.into_iter().map(ApplicationArtifact::from).collect();

    let edges: Vec<(usize, usize)> = {
        let mut by_name: MultiMap<&str, usize> = MultiMap::new();
        for (i, a) in application.iter().enumerate() {
            if !a.name().is_empty() {
                by_name.insert(a.name(), i);
            }
        }

        let mut edges = Vec::new();
        for (dependent, a) in application.iter().enumerate() {
            if a.name().is_empty() {
                continue;
            }
            for dependency in a.dependencies() {
                if let Some(targets) = by_name.get_vec(dependency.as_str()) {
                    edges.extend(
                        targets
                            .iter()
                            .filter(|&&t| application[t].id() != a.id())
                            .map(|&t| (t, dependent)),
                    );
                }
            }
        }
        edges
    };

    for (target, dependent) in edges {
        let name = application[dependent].name().to_owned();
        application[target].add_dependent(&name);
    }
    application
}
