use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CiDagError;
use crate::seed::{is_variable_name, PipelineContext, PipelineSource};

/// Configuration file structure for cidag.
///
/// Holds seeding limits, the default pipeline to seed against and output
/// preferences. Configuration files are loaded from the current directory or
/// a specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Seeding rules
    #[serde(default)]
    pub seed: SeedConfig,

    /// Default pipeline context
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output format preferences
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedConfig {
    /// Maximum number of needs a single job may list
    #[serde(default = "default_needs_size_limit")]
    pub needs_size_limit: usize,

    /// Allow jobs to need jobs of their own stage
    #[serde(default = "default_same_stage_needs")]
    pub same_stage_needs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Git ref the pipeline runs for
    #[serde(rename = "ref")]
    pub ref_: Option<String>,

    /// What triggered the pipeline
    #[serde(default)]
    pub source: PipelineSource,

    /// Project path (e.g., 'group/project')
    #[serde(default)]
    pub project_path: String,

    /// Whether the ref is a tag
    #[serde(default)]
    pub tag: bool,

    /// Whether the ref is protected
    #[serde(default)]
    pub protected: bool,

    /// Pipeline variables
    #[serde(default)]
    pub variables: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Default output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            needs_size_limit: default_needs_size_limit(),
            same_stage_needs: default_same_stage_needs(),
        }
    }
}

fn default_needs_size_limit() -> usize {
    50
}

fn default_same_stage_needs() -> bool {
    true
}

impl PipelineConfig {
    /// Builds the pipeline context, preferring `ref_` over the configured ref.
    pub fn to_context(&self, ref_: Option<&str>) -> PipelineContext {
        let ref_ = ref_
            .map(ToString::to_string)
            .or_else(|| self.ref_.clone())
            .unwrap_or_else(|| "main".to_string());

        PipelineContext {
            ref_,
            sha: None,
            tag: self.tag,
            protected: self.protected,
            source: self.source,
            project_path: self.project_path.clone(),
            variables: self.variables.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cidag.toml
    /// 3. ./cidag.json
    /// 4. ./cidag.yaml
    /// 5. ./cidag.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                log::warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            return Self::load_from_path(path);
        }

        let candidates = ["cidag.toml", "cidag.json", "cidag.yaml", "cidag.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let config: Self = match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Rejects pipeline variables whose names could never be referenced.
    pub fn validate(&self) -> crate::error::Result<()> {
        match self
            .pipeline
            .variables
            .keys()
            .find(|key| !is_variable_name(key))
        {
            Some(key) => Err(CiDagError::Config(format!(
                "invalid pipeline variable name '{key}'"
            ))),
            None => Ok(()),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
