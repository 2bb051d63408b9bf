//! Stage and build seeding: decides which configured jobs end up in a
//! pipeline and turns them into persistable resources.

mod build;
mod context;
mod environment;
mod pipeline;
mod policy;
mod rules;
mod stage;
mod variables;

#[cfg(test)]
mod tests;

pub use build::{BuildResource, BuildSeed, NeedAttributes};
pub use context::{ref_slug, PipelineContext, PipelineSource, SeedContext};
pub use environment::{
    resolve_environment, validate_environment_name, DeploymentSeed, EnvironmentAction,
    EnvironmentSeed, EnvironmentSpec,
};
pub use pipeline::{PipelineSeed, SeedReport};
pub use policy::{Policy, PolicyContext, PolicySpec, RefsPolicy, VariablesPolicy};
pub use rules::{evaluate_rules, Rule, RuleOutcome, RuleWhen};
pub use stage::{StageAttributes, StageResource, StageSeed};
pub use variables::{is_variable_name, Variables};
