use std::collections::HashSet;

use super::node_dict::NodeDictionary;
use super::types::{Group, Link, NeedsKind};

/// Derives one link per satisfied need.
///
/// For every job of every group, each needed name that resolves in the
/// dictionary yields `needed node → group`. Needs that do not resolve (an
/// optional job removed by `rules:`, for instance) are skipped. The result is
/// not deduplicated: two parallel jobs needing the same group yield two
/// identical links.
pub fn make_links_from_nodes(
    groups: &[&Group],
    dict: &NodeDictionary<'_>,
    kind: NeedsKind,
) -> Vec<Link> {
    groups
        .iter()
        .flat_map(|group| {
            group.jobs.iter().flat_map(move |job| {
                job.needs_for(kind)
                    .iter()
                    .filter_map(move |needed| dict.get(needed))
                    .map(move |node| Link::new(node.name, group.name.as_str()))
            })
        })
        .collect()
}

/// Removes repeated `(source, target)` pairs, keeping the first occurrence.
pub fn dedupe_links(links: Vec<Link>) -> Vec<Link> {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(links.len());
    links
        .into_iter()
        .filter(|link| seen.insert((link.source.clone(), link.target.clone())))
        .collect()
}
