use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiDagError {
    #[error("cyclic dependency detected between jobs: {}", jobs.join(", "))]
    CyclicDependency { jobs: Vec<String> },

    #[error("invalid policy for job '{job}': {reason}")]
    Policy { job: String, reason: String },

    #[error("build '{0}' is excluded from the pipeline and cannot be turned into a resource")]
    ExcludedBuild(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CiDagError>;
