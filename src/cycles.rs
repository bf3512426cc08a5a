use crate::artifact::{AnalysedArtifact, CircularDependency};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Report the circular dependencies among a set of artifacts
///
/// Artifacts are nodes, matching dependency names are edges. A depth-first traversal from
/// every unexplored node reports a chain each time it reaches a node that is still on the
/// current path; the chain runs from that node to the one closing the loop. A module
/// depending on itself is a chain of one.
pub fn find_cycles<A: AsRef<AnalysedArtifact>>(artifacts: &[A]) -> Vec<CircularDependency> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut names: Vec<&str> = Vec::new();
    for a in artifacts {
        let name = a.as_ref().name();
        if !name.is_empty() && !index.contains_key(name) {
            index.insert(name, names.len());
            names.push(name);
        }
    }

    // artifacts sharing a name are one node
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    for a in artifacts {
        let a = a.as_ref();
        let from = match index.get(a.name()) {
            Some(&from) => from,
            None => continue,
        };
        for dependency in a.dependencies() {
            if let Some(&to) = index.get(dependency.as_str()) {
                if !edges[from].contains(&to) {
                    edges[from].push(to);
                }
            }
        }
    }

    let mut marks = vec![Mark::Unvisited; names.len()];
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut cycles = Vec::new();

    for root in 0..names.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next edge to follow); the stack is the current path
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnPath;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let next = match edges[node].get(frame.1) {
                Some(&next) => next,
                None => {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
            };
            frame.1 += 1;

            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::OnPath;
                    stack.push((next, 0));
                }
                Mark::OnPath => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let chain: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                    if seen.insert(canonical_rotation(&chain)) {
                        cycles.push(CircularDependency {
                            chain: chain.iter().map(|&n| names[n].to_owned()).collect(),
                        });
                    }
                }
                Mark::Done => {}
            }
        }
    }
    cycles
}

fn canonical_rotation(chain: &[usize]) -> Vec<usize> {
    let start = chain
        .iter()
        .enumerate()
        .min_by_key(|&(_, n)| n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    chain[start..].iter().chain(&chain[..start]).copied().collect()
}
