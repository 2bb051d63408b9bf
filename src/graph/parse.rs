use log::debug;

use super::links::{dedupe_links, make_links_from_nodes};
use super::node_dict::NodeDictionary;
use super::reduction::{ensure_acyclic, filter_by_ancestors};
use super::types::{Group, Link, NeedsKind};
use crate::error::Result;

/// Graph nodes together with their reduced dependency links.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedData<'a> {
    pub nodes: Vec<&'a Group>,
    pub links: Vec<Link>,
}

/// Builds the deduplicated, transitively reduced link list for `groups`.
/// Dangling needs yield no link.
pub fn parse_data<'a>(groups: &[&'a Group], kind: NeedsKind) -> Result<ParsedData<'a>> {
    let dict = NodeDictionary::build(groups, kind);
    ensure_acyclic(&dict)?;

    let all_links = make_links_from_nodes(groups, &dict, kind);
    let unique_links = dedupe_links(all_links);
    let links = filter_by_ancestors(unique_links, &dict);

    debug!(
        "Parsed {} nodes into {} links ({kind:?} needs)",
        groups.len(),
        links.len()
    );

    Ok(ParsedData {
        nodes: groups.to_vec(),
        links,
    })
}
