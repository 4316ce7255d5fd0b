use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use intake_core::SourceConfig;
use tracing::{debug, info};

use crate::error::ConfigLoadError;
use crate::flatten::{OptionMap, parse_document};

pub const CONFIG_PATH_ENV: &str = "INTAKE_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "INTAKE_CONFIG_JSON";
/// Variables named `INTAKE__POLICY__CLASS` map to `policy.class`.
pub const ENV_PREFIX: &str = "INTAKE__";

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "intake.toml",
    "intake.json",
    "config/intake.toml",
    "config/intake.json",
];

/// Where a layer of options came from, lowest precedence first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    EnvInline,
    EnvFile(PathBuf),
    Environment,
    Overrides,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "file {}", path.display()),
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            ConfigSource::EnvFile(path) => write!(f, "env file {}", path.display()),
            ConfigSource::Environment => write!(f, "{ENV_PREFIX}* environment"),
            ConfigSource::Overrides => f.write_str("command line overrides"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Directory the default config locations are resolved against.
    pub search_dir: Option<PathBuf>,
    pub overrides: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// The merged option map plus the layers that contributed to it.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub options: BTreeMap<String, String>,
    pub sources: Vec<ConfigSource>,
}

impl ConfigLoad {
    /// Validate the merged options into a [`SourceConfig`].
    pub fn source_config(&self) -> Result<SourceConfig, ConfigLoadError> {
        Ok(SourceConfig::from_map(self.options.clone())?)
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_search_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.search_dir = Some(dir.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.overrides.push((key.into(), value.into()));
        self
    }

    /// Load against the process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        self.load_with_env(std::env::vars().collect())
    }

    /// Load against an explicit environment snapshot. Entries from the env
    /// file are added to the snapshot without replacing existing variables;
    /// the process environment itself is never modified.
    pub fn load_with_env(
        &self,
        mut env: BTreeMap<String, String>,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut options = OptionMap::new();
        let mut sources = Vec::new();

        if let Some(env_file) = self.read_env_file(&mut env)? {
            sources.push(ConfigSource::EnvFile(env_file));
        }

        let path_source = ConfigPathSource {
            explicit: self.options.config_path.clone(),
            env: env.get(CONFIG_PATH_ENV).map(PathBuf::from),
            default: self.default_location(),
        };
        if let Some((path, provenance)) = path_source.resolved_path() {
            options.extend(read_config_file(&path, provenance)?);
            sources.push(ConfigSource::File(path));
        }

        if let Some(inline) = env.get(CONFIG_JSON_ENV) {
            let parsed = parse_document(inline, Some("json")).map_err(|source| {
                ConfigLoadError::Parse {
                    origin: format!("${CONFIG_JSON_ENV}"),
                    source,
                }
            })?;
            options.extend(parsed);
            sources.push(ConfigSource::EnvInline);
        }

        let from_env = env_options(&env);
        if !from_env.is_empty() {
            debug!(count = from_env.len(), "applying environment options");
            options.extend(from_env);
            sources.push(ConfigSource::Environment);
        }

        if !self.options.overrides.is_empty() {
            options.extend(self.options.overrides.iter().cloned());
            sources.push(ConfigSource::Overrides);
        }

        Ok(ConfigLoad { options, sources })
    }

    fn read_env_file(
        &self,
        env: &mut BTreeMap<String, String>,
    ) -> Result<Option<PathBuf>, ConfigLoadError> {
        let path = match &self.options.env_file {
            Some(path) => path.clone(),
            None => self.resolve(Path::new(".env")),
        };
        let entries = match dotenvy::from_path_iter(&path) {
            Ok(entries) => entries,
            Err(dotenvy::Error::Io(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let (key, value) = entry?;
            env.entry(key).or_insert(value);
        }
        debug!(path = %path.display(), "loaded env file");
        Ok(Some(path))
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        match &self.options.search_dir {
            Some(dir) => dir.join(relative),
            None => relative.to_path_buf(),
        }
    }

    fn default_location(&self) -> Option<PathBuf> {
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(|candidate| self.resolve(Path::new(candidate)))
            .find(|candidate| candidate.is_file())
    }
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

fn read_config_file(
    path: &Path,
    provenance: ConfigPathProvenance,
) -> Result<OptionMap, ConfigLoadError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigLoadError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ConfigLoadError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let extension = path.extension().and_then(|ext| ext.to_str());
    let options =
        parse_document(&contents, extension).map_err(|source| ConfigLoadError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
    info!(path = %path.display(), ?provenance, "loaded configuration file");
    Ok(options)
}

fn env_options(env: &BTreeMap<String, String>) -> OptionMap {
    env.iter()
        .filter_map(|(name, value)| {
            let rest = name.strip_prefix(ENV_PREFIX)?;
            if rest.is_empty() {
                return None;
            }
            let key = rest
                .split("__")
                .map(str::to_ascii_lowercase)
                .collect::<Vec<_>>()
                .join(".");
            Some((key, value.clone()))
        })
        .collect()
}

/// Parse a `key=value` override as passed on the command line.
pub fn parse_assignment(raw: &str) -> Result<(String, String), ConfigLoadError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigLoadError::InvalidAssignment(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_map_to_dotted_keys() {
        let env = BTreeMap::from([
            ("INTAKE__POLICY__FS_WATCHER__POLL_MS".to_string(), "5".to_string()),
            ("INTAKE__TOPIC".to_string(), "t".to_string()),
            ("INTAKE__".to_string(), "ignored".to_string()),
            ("INTAKE_CONFIG_PATH".to_string(), "ignored".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        let options = env_options(&env);
        assert_eq!(options.len(), 2);
        assert_eq!(options["policy.fs_watcher.poll_ms"], "5");
        assert_eq!(options["topic"], "t");
    }

    #[test]
    fn assignments_require_a_key() {
        assert_eq!(
            parse_assignment("policy.class=simple").unwrap(),
            ("policy.class".to_string(), "simple".to_string())
        );
        assert_eq!(parse_assignment("policy.regexp=a=b").unwrap().1, "a=b");
        assert!(matches!(
            parse_assignment("=x"),
            Err(ConfigLoadError::InvalidAssignment(_))
        ));
        assert!(parse_assignment("novalue").is_err());
    }

    #[test]
    fn explicit_path_wins_over_env_and_default() {
        let source = ConfigPathSource {
            explicit: Some(PathBuf::from("a.toml")),
            env: Some(PathBuf::from("b.toml")),
            default: Some(PathBuf::from("c.toml")),
        };
        assert_eq!(
            source.resolved_path(),
            Some((PathBuf::from("a.toml"), ConfigPathProvenance::Explicit))
        );
        assert!(ConfigPathSource::default().resolved_path().is_none());
    }
}
