//! Job dependency graph: needs unwrapping, link building, transitive
//! reduction and longest-path layering for the layered pipeline view.

mod columns;
mod layers;
mod links;
mod node_dict;
mod parse;
mod reduction;
mod types;
mod unwrap;


pub use columns::{generate_columns_from_layers, Column, ColumnCache};
pub use layers::{assign_layers, list_by_layers, max_nodes, Layering, LayersView};
pub use links::{dedupe_links, make_links_from_nodes};
pub use node_dict::{DictNode, NodeDictionary};
pub use parse::{parse_data, ParsedData};
pub use reduction::{all_ancestors, ensure_acyclic, filter_by_ancestors};
pub use types::{
    Connection, Group, Job, Link, NamedNode, NeedsKind, PipelineData, RawGroup, RawJob, RawNeeds,
    RawPipeline, RawStage, Stage, StageLookup, LINK_VALUE,
};
pub use unwrap::{unwrap_pipeline, unwrap_stages_with_needs};
