use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use super::node_dict::NodeDictionary;
use super::types::Link;
use crate::error::{CiDagError, Result};

/// Rejects dictionaries whose needs form a cycle.
///
/// Runs Kahn's algorithm over the distinct nodes. Nodes whose in-degree never
/// drops to zero sit on, or behind, a cycle and are reported in insertion
/// order. A group that needs itself counts as a cycle.
///
/// # Errors
///
/// Returns [`CiDagError::CyclicDependency`] when the needs are not a DAG.
pub fn ensure_acyclic(dict: &NodeDictionary<'_>) -> Result<()> {
    let nodes = dict.nodes();
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|node| (node.name, 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in nodes {
        let predecessors: HashSet<&str> = node
            .needs
            .iter()
            .filter_map(|needed| dict.get(needed))
            .map(|needed| needed.name)
            .collect();

        for predecessor in predecessors {
            successors.entry(predecessor).or_default().push(node.name);
            *in_degree.entry(node.name).or_default() += 1;
        }
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|node| node.name)
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();
    let mut resolved: HashSet<&str> = HashSet::with_capacity(nodes.len());

    while let Some(name) = queue.pop_front() {
        if !resolved.insert(name) {
            continue;
        }
        for &next in successors.get(name).map_or(&[][..], Vec::as_slice) {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    let mut jobs: Vec<String> = Vec::new();
    for node in nodes {
        if !resolved.contains(node.name) && !jobs.iter().any(|job| job == node.name) {
            jobs.push(node.name.to_string());
        }
    }

    if jobs.is_empty() {
        Ok(())
    } else {
        Err(CiDagError::CyclicDependency { jobs })
    }
}

/// Collects every node reachable by following needs from `names`.
///
/// The starting names themselves are not part of the result unless another
/// starting name reaches them. Names are resolved through the dictionary, so
/// parallel job names collapse onto their group, and unknown names are
/// skipped. A visited set bounds the walk even on cyclic input.
pub fn all_ancestors<'a>(names: &[&'a str], dict: &NodeDictionary<'a>) -> HashSet<&'a str> {
    let mut ancestors: HashSet<&'a str> = HashSet::new();
    let mut stack: Vec<&'a str> = names
        .iter()
        .flat_map(|name| dict.needs_of(name).iter().copied())
        .collect();

    while let Some(needed) = stack.pop() {
        let Some(node) = dict.get(needed) else {
            continue;
        };
        if ancestors.insert(node.name) {
            stack.extend(node.needs.iter().copied());
        }
    }

    ancestors
}

/// Drops links already implied by a longer path.
///
/// A link `source → target` is redundant when `source` is an ancestor of one
/// of `target`'s other needs. Surviving links keep their relative order.
pub fn filter_by_ancestors(links: Vec<Link>, dict: &NodeDictionary<'_>) -> Vec<Link> {
    let before = links.len();

    let filtered: Vec<Link> = links
        .into_iter()
        .filter(|link| {
            let other_needs: Vec<&str> = dict
                .needs_of(&link.target)
                .iter()
                .copied()
                .filter(|needed| {
                    dict.get(needed)
                        .is_some_and(|node| node.name != link.source)
                })
                .collect();

            !all_ancestors(&other_needs, dict).contains(link.source.as_str())
        })
        .collect();

    debug!(
        "Transitive reduction removed {} of {} links",
        before - filtered.len(),
        before
    );

    filtered
}
