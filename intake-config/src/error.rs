use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {}", path.display())]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {origin}")]
    Parse {
        origin: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid override '{0}', expected key=value")]
    InvalidAssignment(String),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
    #[error(transparent)]
    Invalid(#[from] intake_core::ConfigError),
}
