use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};

use super::variables::Variables;

const MAX_ENVIRONMENT_NAME_LENGTH: usize = 255;

/// What a job does to its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentAction {
    #[default]
    Start,
    Prepare,
    Stop,
    Verify,
    Access,
}

impl EnvironmentAction {
    fn parse(action: &str) -> Self {
        match action {
            "prepare" => Self::Prepare,
            "stop" => Self::Stop,
            "verify" => Self::Verify,
            "access" => Self::Access,
            _ => Self::Start,
        }
    }

    /// Only starting an environment deploys to it.
    pub fn deploys(self) -> bool {
        self == Self::Start
    }
}

/// Environment declared by a job, before variable expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub action: EnvironmentAction,
}

impl EnvironmentSpec {
    /// Reads `environment` (a name) and `options.environment` (`{ name, action }`).
    pub fn from_attributes(attributes: &Map<String, Value>) -> Option<Self> {
        let options = attributes
            .get("options")
            .and_then(|options| options.get("environment"));

        let name = options
            .and_then(|environment| environment.get("name"))
            .or_else(|| attributes.get("environment"))
            .and_then(|name| match name {
                Value::String(name) => Some(name.clone()),
                Value::Object(object) => object
                    .get("name")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                _ => None,
            })?;

        let action = options
            .and_then(|environment| environment.get("action"))
            .or_else(|| {
                attributes
                    .get("environment")
                    .and_then(|environment| environment.get("action"))
            })
            .and_then(Value::as_str)
            .map_or(EnvironmentAction::Start, EnvironmentAction::parse);

        Some(Self { name, action })
    }
}

/// An environment the job runs in, after expansion and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSeed {
    pub name: String,
    pub action: EnvironmentAction,
}

/// A deployment of one build to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSeed {
    pub environment: String,
    pub deployable: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub sha: Option<String>,
    pub tag: bool,
    pub status: String,
}

/// Expands and validates a job's environment.
///
/// Returns `None` when the expanded name is invalid; the job then runs as a
/// plain job. The failure is logged, never raised.
pub fn resolve_environment(
    spec: &EnvironmentSpec,
    variables: &Variables,
    job_name: &str,
    project_path: &str,
) -> Option<EnvironmentSeed> {
    let name = variables.expand(&spec.name);

    if let Err(reason) = validate_environment_name(&name) {
        warn!(
            "Failed to create environment '{name}' for job '{job_name}' in project '{project_path}': {reason}"
        );
        return None;
    }

    Some(EnvironmentSeed {
        name,
        action: spec.action,
    })
}

/// Checks an expanded environment name, returning a readable reason when it
/// is empty, too long, uses disallowed characters or has a leading or
/// trailing `/`.
pub fn validate_environment_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name can't be blank".to_string());
    }
    if name.chars().count() > MAX_ENVIRONMENT_NAME_LENGTH {
        return Err(format!(
            "Name is too long (maximum is {MAX_ENVIRONMENT_NAME_LENGTH} characters)"
        ));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || "-_/${}. ".contains(c);
    if !name.chars().all(allowed) || name.starts_with('/') || name.ends_with('/') {
        return Err("Name can contain only letters, digits, '-', '_', '/', '$', '{', '}', '.', and spaces, but it cannot start or end with '/'".to_string());
    }

    Ok(())
}
