use log::{debug, info};
use serde::Serialize;

use super::context::SeedContext;
use super::stage::{StageAttributes, StageResource, StageSeed};
use crate::error::Result;

/// Everything the persistence layer needs from a seeded pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedReport {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub stages: Vec<StageResource>,
    pub errors: Option<Vec<String>>,
    pub size: usize,
}

/// Seeds every stage of a pipeline in declared order.
#[derive(Debug)]
pub struct PipelineSeed<'a> {
    context: &'a SeedContext,
    stages: Vec<StageSeed<'a>>,
}

impl<'a> PipelineSeed<'a> {
    /// Fails when a build has malformed `only`, `except`, `rules` or
    /// `needs_attributes`.
    pub fn new(context: &'a SeedContext, stages: Vec<StageAttributes>) -> Result<Self> {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(position, attributes)| StageSeed::new(context, attributes, position))
            .collect::<Result<Vec<_>>>()?;

        debug!("Seeding {} stages for ref '{}'", stages.len(), context.pipeline.ref_);
        Ok(Self { context, stages })
    }

    pub fn from_stages(context: &'a SeedContext, stages: Vec<StageSeed<'a>>) -> Self {
        Self { context, stages }
    }

    /// All stage seeds, including those without any included build.
    pub fn stage_seeds(&self) -> &[StageSeed<'a>] {
        &self.stages
    }

    /// Included stages with their included builds.
    pub fn stages(&self) -> Result<Vec<StageResource>> {
        let mut resources = Vec::new();
        for stage in &self.stages {
            if stage.included()? {
                resources.push(stage.to_resource()?);
            }
        }
        Ok(resources)
    }

    /// Every stage's errors flattened, or `None` when there are none.
    pub fn errors(&self) -> Result<Option<Vec<String>>> {
        let same_stage_needs = self.context.config.same_stage_needs;
        let mut errors = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            errors.extend(stage.errors(&self.stages[..index], same_stage_needs)?);
        }

        if errors.is_empty() {
            Ok(None)
        } else {
            info!("Pipeline seed has {} configuration errors", errors.len());
            Ok(Some(errors))
        }
    }

    /// Number of builds that will be created.
    pub fn size(&self) -> Result<usize> {
        self.stages.iter().map(StageSeed::size).sum()
    }

    /// Stages, errors and size in one go.
    pub fn report(&self) -> Result<SeedReport> {
        Ok(SeedReport {
            ref_: self.context.pipeline.ref_.clone(),
            stages: self.stages()?,
            errors: self.errors()?,
            size: self.size()?,
        })
    }
}
