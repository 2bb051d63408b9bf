use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use log::debug;
use serde::Serialize;

use super::parse::parse_data;
use super::types::{Group, Link, NeedsKind, PipelineData};
use crate::error::{CiDagError, Result};

/// Layer index assigned to every node, in node input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layering {
    layers: IndexMap<String, usize>,
}

impl Layering {
    pub fn layer_of(&self, name: &str) -> Option<usize> {
        self.layers.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.layers.iter().map(|(name, &layer)| (name.as_str(), layer))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Node names grouped by layer. Within a layer, names keep input order.
    pub fn pipeline_layers(&self) -> Vec<Vec<String>> {
        let depth = self.layers.values().max().map_or(0, |&max| max + 1);
        let mut grouped: Vec<Vec<String>> = vec![Vec::new(); depth];
        for (name, &layer) in &self.layers {
            grouped[layer].push(name.clone());
        }
        grouped
    }
}

/// Assigns longest-path layers.
///
/// Nodes without incoming links sit in layer 0; every other node sits one
/// layer after its deepest dependency. Disconnected subgraphs each start at 0.
/// Links naming unknown nodes are ignored; a cycle is an error.
pub fn assign_layers(nodes: &[&Group], links: &[Link]) -> Result<Layering> {
    let mut layers: IndexMap<String, usize> =
        nodes.iter().map(|node| (node.name.clone(), 0)).collect();
    let mut in_degree: HashMap<&str, usize> =
        nodes.iter().map(|node| (node.name.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for link in links {
        if !layers.contains_key(&link.source) || !layers.contains_key(&link.target) {
            continue;
        }
        successors
            .entry(link.source.as_str())
            .or_default()
            .push(link.target.as_str());
        *in_degree.entry(link.target.as_str()).or_default() += 1;
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|node| node.name.as_str())
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(name) = queue.pop_front() {
        // Repeated group names share one node.
        if !seen.insert(name) {
            continue;
        }
        let next_layer = layers.get(name).map_or(0, |&layer| layer + 1);

        for &target in successors.get(name).map_or(&[][..], Vec::as_slice) {
            if let Some(layer) = layers.get_mut(target) {
                *layer = (*layer).max(next_layer);
            }
            if let Some(degree) = in_degree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    if seen.len() < layers.len() {
        let jobs = layers
            .keys()
            .filter(|name| in_degree.get(name.as_str()).is_some_and(|&degree| degree > 0))
            .cloned()
            .collect();
        return Err(CiDagError::CyclicDependency { jobs });
    }

    Ok(Layering { layers })
}

/// Layered view of a pipeline, ready for column rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayersView {
    /// Reduced links using previous-stage fallback needs, for the link overlay.
    pub links_data: Vec<Link>,
    pub num_groups: usize,
    /// Group names per layer, index 0 first.
    pub pipeline_layers: Vec<Vec<String>>,
}

/// Computes the layer view of a normalized pipeline.
///
/// Layers come from explicit needs only, since those reflect the real DAG.
/// The returned links use previous-stage fallback needs so that stage-ordered
/// jobs are still connected in the overlay.
///
/// # Errors
///
/// Returns [`CiDagError::CyclicDependency`] when the needs contain a cycle.
pub fn list_by_layers(pipeline: &PipelineData) -> Result<LayersView> {
    let groups = pipeline.groups();

    let parsed = parse_data(&groups, NeedsKind::PreviousStageFallback)?;
    let explicit = parse_data(&groups, NeedsKind::Explicit)?;
    let layering = assign_layers(&explicit.nodes, &explicit.links)?;
    let pipeline_layers = layering.pipeline_layers();

    debug!(
        "Laid out {} groups across {} layers",
        groups.len(),
        pipeline_layers.len()
    );

    Ok(LayersView {
        links_data: parsed.links,
        num_groups: groups.len(),
        pipeline_layers,
    })
}

/// Size of the most populated layer, which bounds the diagram height.
pub fn max_nodes(pipeline_layers: &[Vec<String>]) -> usize {
    pipeline_layers.iter().map(Vec::len).max().unwrap_or(0)
}
