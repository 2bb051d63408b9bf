use std::cell::OnceCell;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::build::{BuildResource, BuildSeed};
use super::context::SeedContext;
use crate::error::Result;

/// A stage as handed over by the configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StageAttributes {
    pub name: String,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub builds: Vec<Map<String, Value>>,
}

/// A stage ready to be persisted together with its builds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResource {
    pub name: String,
    pub position: usize,
    pub builds: Vec<BuildResource>,
}

#[derive(Debug)]
pub struct StageSeed<'a> {
    name: String,
    position: usize,
    builds: Vec<BuildSeed<'a>>,
    included: OnceCell<Vec<usize>>,
}

impl<'a> StageSeed<'a> {
    pub fn new(context: &'a SeedContext, attributes: StageAttributes, position: usize) -> Result<Self> {
        let position = attributes.index.unwrap_or(position);
        let builds = attributes
            .builds
            .into_iter()
            .map(|build| BuildSeed::new(context, build, &attributes.name, position))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_builds(attributes.name, position, builds))
    }

    /// Assembles a stage from already created build seeds.
    pub fn from_builds(name: impl Into<String>, position: usize, builds: Vec<BuildSeed<'a>>) -> Self {
        Self {
            name: name.into(),
            position,
            builds,
            included: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Every build seed, included or not.
    pub fn all_seeds(&self) -> &[BuildSeed<'a>] {
        &self.builds
    }

    /// The included build seeds, in declaration order.
    pub fn seeds(&self) -> Result<Vec<&BuildSeed<'a>>> {
        let indices = match self.included.get() {
            Some(indices) => indices,
            None => {
                let mut indices = Vec::new();
                for (index, build) in self.builds.iter().enumerate() {
                    if build.included()? {
                        indices.push(index);
                    }
                }
                self.included.get_or_init(|| indices)
            }
        };

        Ok(indices.iter().map(|&index| &self.builds[index]).collect())
    }

    pub fn seeds_names(&self) -> Result<Vec<&str>> {
        Ok(self.seeds()?.into_iter().map(BuildSeed::name).collect())
    }

    /// A stage is included when at least one of its builds is.
    pub fn included(&self) -> Result<bool> {
        Ok(!self.seeds()?.is_empty())
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.seeds()?.len())
    }

    /// Errors of the included builds, given the stages seeded before this one.
    pub fn errors(&self, previous: &[StageSeed<'a>], same_stage_needs: bool) -> Result<Vec<String>> {
        let mut available = Vec::new();
        for stage in previous {
            available.extend(stage.seeds_names()?);
        }
        if same_stage_needs {
            available.extend(self.seeds_names()?);
        }

        let mut errors = Vec::new();
        for build in self.seeds()? {
            errors.extend(build.errors(&available)?);
        }
        Ok(errors)
    }

    pub fn to_resource(&self) -> Result<StageResource> {
        let builds = self
            .seeds()?
            .into_iter()
            .map(|build| build.to_resource().cloned())
            .collect::<Result<Vec<_>>>()?;

        Ok(StageResource {
            name: self.name.clone(),
            position: self.position,
            builds,
        })
    }
}
