use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::policy::LifecycleState;

/// Failures reported by a filesystem adapter.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("filesystem {uri} is unreachable: {reason}")]
    Unreachable { uri: String, reason: String },

    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("watch error on {}: {reason}", path.display())]
    Watch { path: PathBuf, reason: String },

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl FsError {
    /// Maps an IO error, folding `NotFound` into [`FsError::NotFound`].
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path)
        } else {
            FsError::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    /// Errors worth retrying with backoff. Watched roots give up at once on
    /// anything else that is not a missing path.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            FsError::Unreachable { .. } | FsError::Io { .. } | FsError::Watch { .. }
        )
    }
}

/// Configuration validation failures. Always raised while a policy is being
/// built, never once it runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    Missing(String),

    #[error("invalid value {value:?} for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid selection pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid root uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported filesystem scheme `{scheme}` in {uri:?}")]
    UnsupportedScheme { scheme: String, uri: String },

    #[error("unknown policy type `{0}`")]
    UnknownPolicy(String),

    #[error("policy `{0}` must be built inside a tokio runtime")]
    MissingRuntime(String),
}

impl ConfigError {
    pub(crate) fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to the task driver.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Construction failed; `cause` carries the validation error.
    #[error("could not build policy `{policy}`")]
    Build {
        policy: String,
        #[source]
        cause: ConfigError,
    },

    #[error("policy has already ended (state: {state})")]
    IllegalState { state: LifecycleState },
}

impl PolicyError {
    pub(crate) fn build(policy: impl Into<String>, cause: ConfigError) -> Self {
        PolicyError::Build {
            policy: policy.into(),
            cause,
        }
    }

    /// The configuration error behind a [`PolicyError::Build`].
    pub fn config_cause(&self) -> Option<&ConfigError> {
        match self {
            PolicyError::Build { cause, .. } => Some(cause),
            PolicyError::IllegalState { .. } => None,
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, PolicyError::IllegalState { .. })
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn build_error_exposes_config_cause_as_source() {
        let err = PolicyError::build(
            "fs_watcher",
            ConfigError::invalid("policy.fs_watcher.poll_ms", "invalid", "not an integer"),
        );

        let source = err.source().expect("build error has a source");
        assert!(source.downcast_ref::<ConfigError>().is_some());
        assert!(matches!(
            err.config_cause(),
            Some(ConfigError::InvalidValue { key, .. }) if key == "policy.fs_watcher.poll_ms"
        ));
    }

    #[test]
    fn io_not_found_is_classified_as_missing_path() {
        let err = FsError::io("/data/a", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!err.is_connectivity());

        let err = FsError::io("/data/a", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.is_connectivity());
    }
}
