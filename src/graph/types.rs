use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A collection as delivered by the API layer.
///
/// GraphQL responses wrap lists in a `{ "nodes": [...] }` connection, while
/// REST-style payloads and fixtures use plain arrays. Both shapes are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Connection<T> {
    Nodes { nodes: Vec<T> },
    List(Vec<T>),
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl<T> Connection<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Nodes { nodes } | Self::List(nodes) => nodes,
        }
    }
}

/// A named node inside a `needs` connection.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedNode {
    #[serde(default)]
    pub name: Option<String>,
}

/// The `needs` field of a raw job: either `["a", "b"]` or `{ nodes: [{ name }] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawNeeds {
    Names(Vec<String>),
    Nodes { nodes: Vec<NamedNode> },
}

impl RawNeeds {
    /// Flattens either shape into plain job names. Nodes without a name become `""`.
    pub fn into_names(self) -> Vec<String> {
        match self {
            Self::Names(names) => names,
            Self::Nodes { nodes } => nodes
                .into_iter()
                .map(|node| node.name.unwrap_or_default())
                .collect(),
        }
    }
}

/// A stage as produced by the configuration/API layer, before normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStage {
    pub name: String,
    #[serde(default)]
    pub groups: Connection<RawGroup>,
}

/// A job group (parallel jobs sharing one name) before normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGroup {
    pub name: String,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub jobs: Connection<RawJob>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A job before its `needs` are unwrapped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJob {
    pub name: String,
    #[serde(default)]
    pub needs: Option<RawNeeds>,
    #[serde(default)]
    pub previous_stage_jobs_union_needs: Option<RawNeeds>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Input document accepted by the graph entry points: `{ "stages": [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipeline {
    #[serde(default)]
    pub stages: Connection<RawStage>,
}

/// A normalized stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    pub groups: Vec<Group>,
}

/// A normalized job group. The owning stage name is denormalized onto it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    pub stage_name: String,
    pub size: usize,
    pub jobs: Vec<Job>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A normalized job with flat needs lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    pub stage_name: String,
    /// Needs declared on the job itself. Never falls back to the previous stage.
    pub needs: Vec<String>,
    /// Declared needs, or every job of the previous stage when none were declared.
    pub previous_stage_jobs_union_needs: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which needs list of a job drives a graph computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeedsKind {
    /// Only the dependencies a job lists itself.
    #[default]
    Explicit,
    /// Listed dependencies, or the whole previous stage for jobs listing none.
    PreviousStageFallback,
}

impl Job {
    pub fn needs_for(&self, kind: NeedsKind) -> &[String] {
        match kind {
            NeedsKind::Explicit => &self.needs,
            NeedsKind::PreviousStageFallback => &self.previous_stage_jobs_union_needs,
        }
    }
}

/// Position of a group inside the normalized stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLookup {
    pub stage_idx: usize,
    pub group_idx: usize,
}

/// Normalized pipeline: stages plus a group name lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineData {
    pub stages: Vec<Stage>,
    pub stages_lookup: IndexMap<String, StageLookup>,
}

impl PipelineData {
    /// All groups across stages, in stage order.
    pub fn groups(&self) -> Vec<&Group> {
        self.stages.iter().flat_map(|stage| &stage.groups).collect()
    }
}

/// Weight attached to every link. Only meaningful to the layout engine.
pub const LINK_VALUE: u32 = 10;

/// A directed dependency: `source` must finish before `target` starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Link {
    pub source: String,
    pub target: String,
    pub value: u32,
}

impl Link {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            value: LINK_VALUE,
        }
    }
}
