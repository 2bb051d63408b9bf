use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::variables::Variables;
use crate::config::SeedConfig;

/// What triggered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    #[default]
    Push,
    Web,
    Trigger,
    Schedule,
    Api,
    External,
    Pipeline,
    Chat,
    MergeRequestEvent,
    ExternalPullRequestEvent,
}

impl PipelineSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Web => "web",
            Self::Trigger => "trigger",
            Self::Schedule => "schedule",
            Self::Api => "api",
            Self::External => "external",
            Self::Pipeline => "pipeline",
            Self::Chat => "chat",
            Self::MergeRequestEvent => "merge_request_event",
            Self::ExternalPullRequestEvent => "external_pull_request_event",
        }
    }

    /// Source name as used by `only:refs` keywords (`merge_request_event` → `merge_request`).
    pub fn keyword(self) -> &'static str {
        let name = self.as_str();
        name.strip_suffix("_event").unwrap_or(name)
    }
}

/// The pipeline a seed is built for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineContext {
    #[serde(rename = "ref")]
    pub ref_: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub tag: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub source: PipelineSource,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
}

impl PipelineContext {
    pub fn new(ref_: impl Into<String>, project_path: impl Into<String>) -> Self {
        Self {
            ref_: ref_.into(),
            project_path: project_path.into(),
            ..Self::default()
        }
    }

    /// Branch pipelines are neither tag nor merge request pipelines.
    pub fn is_branch(&self) -> bool {
        !self.tag && self.source != PipelineSource::MergeRequestEvent
    }

    /// Predefined `CI_*` variables followed by the pipeline's own variables.
    pub fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("CI_COMMIT_REF_NAME", &self.ref_);
        variables.insert("CI_COMMIT_REF_SLUG", ref_slug(&self.ref_));
        if self.tag {
            variables.insert("CI_COMMIT_TAG", &self.ref_);
        } else {
            variables.insert("CI_COMMIT_BRANCH", &self.ref_);
        }
        if let Some(sha) = &self.sha {
            variables.insert("CI_COMMIT_SHA", sha);
        }
        variables.insert("CI_PIPELINE_SOURCE", self.source.as_str());
        variables.insert("CI_PROJECT_PATH", &self.project_path);
        variables.insert(
            "CI_COMMIT_REF_PROTECTED",
            if self.protected { "true" } else { "false" },
        );
        for (key, value) in &self.variables {
            variables.insert(key, value);
        }
        variables
    }
}

/// Everything a seed needs besides its own attributes.
#[derive(Debug, Clone, Default)]
pub struct SeedContext {
    pub pipeline: PipelineContext,
    pub config: SeedConfig,
}

impl SeedContext {
    pub fn new(pipeline: PipelineContext, config: SeedConfig) -> Self {
        Self { pipeline, config }
    }
}

/// Lowercased ref with anything outside `[a-z0-9]` replaced by `-`, at most 63 chars.
pub fn ref_slug(ref_: &str) -> String {
    let slug: String = ref_
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(63)
        .collect();
    slug.trim_matches('-').to_string()
}
