use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use cidag::config::{Config, OutputFormat};
use cidag::graph::{list_by_layers, parse_data, unwrap_pipeline, Link, NeedsKind, RawPipeline};
use cidag::seed::{PipelineSeed, SeedContext, StageAttributes};

use crate::output;

#[derive(Parser)]
#[command(name = "cidag")]
#[command(author, version, about = "CI pipeline job graphs and seeding", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long, global = true, env = "CIDAG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out pipeline groups in dependency layers
    Layers { file: PathBuf },

    /// Print the deduplicated, transitively reduced links
    Links {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = NeedsArg::Explicit)]
        needs: NeedsArg,
    },

    /// Decide which builds a pipeline gets and print them
    Seed {
        file: PathBuf,

        #[arg(short = 'r', long = "ref")]
        git_ref: Option<String>,

        #[arg(short, long)]
        tag: bool,

        #[arg(long = "var", value_parser = parse_variable)]
        variables: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NeedsArg {
    Explicit,
    Fallback,
}

impl From<NeedsArg> for NeedsKind {
    fn from(needs: NeedsArg) -> Self {
        match needs {
            NeedsArg::Explicit => NeedsKind::Explicit,
            NeedsArg::Fallback => NeedsKind::PreviousStageFallback,
        }
    }
}

#[derive(Deserialize)]
struct SeedFile {
    #[serde(default)]
    stages: Vec<StageAttributes>,
}

#[derive(Serialize)]
struct LinksOutput<'a> {
    nodes: Vec<&'a str>,
    links: &'a [Link],
}

fn parse_variable(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

/// Reads a JSON or YAML document, picking the format from the extension.
fn read_input<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON input: {}", path.display())),
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML input: {}", path.display())),
        _ => serde_json::from_str(&contents)
            .or_else(|_| serde_yaml::from_str(&contents))
            .with_context(|| format!("Failed to parse input file: {}", path.display())),
    }
}

impl Cli {
    fn write_json<T: Serialize>(&self, value: &T, pretty: bool) -> Result<()> {
        let json_output = if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }

    fn execute_layers(&self, file: &Path, config: &Config) -> Result<()> {
        info!("Laying out pipeline from: {}", file.display());

        let pipeline = unwrap_pipeline(read_input::<RawPipeline>(file)?);
        let view = list_by_layers(&pipeline)?;

        match self.format(config) {
            OutputFormat::Json => self.write_json(&view, self.pretty(config)),
            OutputFormat::Table => {
                output::print_layers(&view);
                Ok(())
            }
        }
    }

    fn execute_links(&self, file: &Path, needs: NeedsArg, config: &Config) -> Result<()> {
        info!("Building {needs:?} links from: {}", file.display());

        let pipeline = unwrap_pipeline(read_input::<RawPipeline>(file)?);
        let groups = pipeline.groups();
        let parsed = parse_data(&groups, needs.into())?;

        match self.format(config) {
            OutputFormat::Json => {
                let links = LinksOutput {
                    nodes: parsed.nodes.iter().map(|group| group.name.as_str()).collect(),
                    links: &parsed.links,
                };
                self.write_json(&links, self.pretty(config))
            }
            OutputFormat::Table => {
                output::print_links(&parsed.links);
                Ok(())
            }
        }
    }

    fn execute_seed(
        &self,
        file: &Path,
        git_ref: Option<&str>,
        tag: bool,
        variables: &[(String, String)],
        config: &Config,
    ) -> Result<()> {
        let mut pipeline = config.pipeline.to_context(git_ref);
        pipeline.tag |= tag;
        pipeline.variables.extend(variables.iter().cloned());
        info!("Seeding pipeline for ref '{}' from: {}", pipeline.ref_, file.display());

        let seed_file: SeedFile = read_input(file)?;
        if seed_file.stages.is_empty() {
            bail!("No stages found in {}", file.display());
        }

        let context = SeedContext::new(pipeline, config.seed.clone());
        let seed = PipelineSeed::new(&context, seed_file.stages)?;
        let report = seed.report()?;

        match self.format(config) {
            OutputFormat::Json => self.write_json(&report, self.pretty(config)),
            OutputFormat::Table => {
                output::print_seed(&report, seed.stage_seeds());
                Ok(())
            }
        }
    }

    fn format(&self, config: &Config) -> OutputFormat {
        let format = self.format.unwrap_or(config.output.format);
        if format == OutputFormat::Table && self.output.is_some() {
            warn!("--output is ignored for table output");
        }
        format
    }

    fn pretty(&self, config: &Config) -> bool {
        self.pretty || config.output.pretty
    }

    pub fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Layers { file } => self.execute_layers(file, &config),
            Commands::Links { file, needs } => self.execute_links(file, *needs, &config),
            Commands::Seed {
                file,
                git_ref,
                tag,
                variables,
            } => self.execute_seed(file, git_ref.as_deref(), *tag, variables, &config),
        }
    }
}
