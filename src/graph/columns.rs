use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use super::types::{Group, PipelineData};
use crate::error::Result;

/// A pseudo-stage holding every group of one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub id: String,
    pub groups: Vec<Group>,
}

/// Turns layer name lists into renderable columns `layer-0`, `layer-1`, ...
///
/// Group records are looked up through the pipeline's stage lookup; names the
/// lookup does not know are left out of the column.
pub fn generate_columns_from_layers(
    pipeline: &PipelineData,
    pipeline_layers: &[Vec<String>],
) -> Vec<Column> {
    pipeline_layers
        .iter()
        .enumerate()
        .map(|(idx, layer)| Column {
            name: String::new(),
            id: format!("layer-{idx}"),
            groups: layer
                .iter()
                .filter_map(|name| {
                    let lookup = pipeline.stages_lookup.get(name)?;
                    pipeline
                        .stages
                        .get(lookup.stage_idx)?
                        .groups
                        .get(lookup.group_idx)
                })
                .cloned()
                .collect(),
        })
        .collect()
}

/// Memoizes [`generate_columns_from_layers`] by input signature.
///
/// Re-renders tend to ask for the same columns repeatedly; identical inputs
/// return the cached columns. A cache lives as long as its owner decides and
/// holds no global state.
#[derive(Debug, Default)]
pub struct ColumnCache {
    entries: HashMap<Vec<u8>, Vec<Column>>,
}

impl ColumnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached columns for these inputs, generating them on first use.
    pub fn columns(
        &mut self,
        pipeline: &PipelineData,
        pipeline_layers: &[Vec<String>],
    ) -> Result<&[Column]> {
        let key = serde_json::to_vec(&(pipeline, pipeline_layers))?;

        let columns = self.entries.entry(key).or_insert_with(|| {
            debug!("Column cache miss for {} layers", pipeline_layers.len());
            generate_columns_from_layers(pipeline, pipeline_layers)
        });

        Ok(columns.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
