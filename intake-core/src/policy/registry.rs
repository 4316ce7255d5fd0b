//! Builds policies by name.
//!
//! `policy.class` names an entry of the [`PolicyRegistry`]. Building first
//! parses every root uri and connects its adapter, then hands the bound roots
//! to the policy constructor. Every failure on the way is reported as
//! [`PolicyError::Build`] with the underlying [`ConfigError`] as its source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{FilesystemRoot, Policy, PolicyKind, ScheduledPolicy, SimplePolicy, SleepyPolicy};
use super::watcher::WatcherPolicy;
use crate::config::SourceConfig;
use crate::error::{ConfigError, PolicyError};
use crate::fs::{AdapterRegistry, RootUri};
use crate::selection::SelectionRule;

/// Everything a policy constructor needs.
#[derive(Debug)]
pub struct PolicyContext {
    pub config: SourceConfig,
    pub roots: Vec<FilesystemRoot>,
    pub rule: Arc<SelectionRule>,
}

impl PolicyContext {
    /// Parse every root uri and connect its adapter.
    pub fn from_config(
        config: &SourceConfig,
        adapters: &AdapterRegistry,
    ) -> Result<Self, ConfigError> {
        let rule = Arc::new(config.selection_rule()?);
        let roots = config
            .uris()
            .iter()
            .map(|raw| {
                let uri = RootUri::parse(raw)?;
                let fs = adapters.connect(&uri, config.fs_options())?;
                debug!(root = %uri, scheme = uri.scheme(), "root bound to adapter");
                Ok(FilesystemRoot::new(uri, fs))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            config: config.clone(),
            roots,
            rule,
        })
    }
}

pub type PolicyConstructor = fn(PolicyContext) -> Result<Box<dyn Policy>, ConfigError>;

/// Maps policy names to constructors.
#[derive(Clone)]
pub struct PolicyRegistry {
    constructors: BTreeMap<String, PolicyConstructor>,
    adapters: AdapterRegistry,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(AdapterRegistry::default());
        registry.register(PolicyKind::Simple.as_str(), build_simple);
        registry.register(PolicyKind::Sleepy.as_str(), build_sleepy);
        registry.register(PolicyKind::Scheduled.as_str(), build_scheduled);
        registry.register(PolicyKind::FsWatcher.as_str(), build_watcher);
        registry.register("watcher", build_watcher);
        registry
    }
}

fn build_simple(ctx: PolicyContext) -> Result<Box<dyn Policy>, ConfigError> {
    Ok(Box::new(SimplePolicy::new(ctx)?))
}

fn build_sleepy(ctx: PolicyContext) -> Result<Box<dyn Policy>, ConfigError> {
    Ok(Box::new(SleepyPolicy::new(ctx)?))
}

fn build_scheduled(ctx: PolicyContext) -> Result<Box<dyn Policy>, ConfigError> {
    Ok(Box::new(ScheduledPolicy::new(ctx)?))
}

fn build_watcher(ctx: PolicyContext) -> Result<Box<dyn Policy>, ConfigError> {
    Ok(Box::new(WatcherPolicy::new(ctx)?))
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .field("adapters", &self.adapters)
            .finish()
    }
}

impl PolicyRegistry {
    /// A registry without policies, connecting roots through `adapters`.
    pub fn empty(adapters: AdapterRegistry) -> Self {
        Self {
            constructors: BTreeMap::new(),
            adapters,
        }
    }

    /// Register (or replace) a policy. Names are case-insensitive.
    pub fn register(&mut self, name: impl Into<String>, constructor: PolicyConstructor) {
        self.constructors
            .insert(normalize(&name.into()), constructor);
    }

    pub fn adapters_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.adapters
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&normalize(name))
    }

    /// Build the policy named by `policy.class`.
    pub fn build(&self, config: &SourceConfig) -> Result<Box<dyn Policy>, PolicyError> {
        let name = config.policy_class();
        self.try_build(config)
            .map_err(|cause| PolicyError::build(name, cause))
    }

    fn try_build(&self, config: &SourceConfig) -> Result<Box<dyn Policy>, ConfigError> {
        let name = config.policy_class();
        let constructor = self
            .constructors
            .get(&normalize(name))
            .ok_or_else(|| ConfigError::UnknownPolicy(name.to_string()))?;

        let policy = constructor(PolicyContext::from_config(config, &self.adapters)?)?;
        info!(
            policy = %policy.kind(),
            roots = policy.roots().len(),
            pattern = config.regexp(),
            "policy built"
        );
        Ok(policy)
    }
}

// `com.example.SimplePolicy`-style names resolve to their last segment.
fn normalize(name: &str) -> String {
    let name = name.trim();
    let short = name.rsplit(['.', ':']).next().unwrap_or(name);
    let short = short.strip_suffix("Policy").unwrap_or(short);
    let mut normalized = String::with_capacity(short.len() + 2);
    for (idx, ch) in short.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 && !normalized.ends_with('_') {
                normalized.push('_');
            }
            normalized.push(ch.to_ascii_lowercase());
        } else if ch == '-' {
            normalized.push('_');
        } else {
            normalized.push(ch);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;

    fn config(class: &str, uris: &str) -> SourceConfig {
        SourceConfig::from_map(BTreeMap::from([
            (keys::FS_URIS.to_string(), uris.to_string()),
            (keys::TOPIC.to_string(), "topic_test".to_string()),
            (keys::POLICY_CLASS.to_string(), class.to_string()),
            (keys::FILE_READER_CLASS.to_string(), "text".to_string()),
        ]))
        .unwrap()
    }

    #[test]
    fn normalizes_policy_names() {
        assert_eq!(normalize("simple"), "simple");
        assert_eq!(normalize("SimplePolicy"), "simple");
        assert_eq!(normalize("com.acme.policy.FsWatcherPolicy"), "fs_watcher");
        assert_eq!(normalize("intake_core::policy::SleepyPolicy"), "sleepy");
        assert_eq!(normalize("fs-watcher"), "fs_watcher");
    }

    #[tokio::test]
    async fn builds_registered_policies() {
        let registry = PolicyRegistry::default();
        assert!(registry.contains("FsWatcher"));

        let policy = registry.build(&config("SimplePolicy", "/tmp/a,/tmp/b")).unwrap();
        assert_eq!(policy.kind(), PolicyKind::Simple);
        assert_eq!(policy.roots().len(), 2);
    }

    #[tokio::test]
    async fn unknown_policy_and_scheme_fail_to_build() {
        let registry = PolicyRegistry::default();

        let err = registry.build(&config("nope", "/tmp/a")).unwrap_err();
        assert!(matches!(err.config_cause(), Some(ConfigError::UnknownPolicy(name)) if name == "nope"));

        let err = registry
            .build(&config("simple", "/tmp/a,ftp://host/data"))
            .unwrap_err();
        assert!(matches!(
            err.config_cause(),
            Some(ConfigError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn watcher_outside_runtime_is_a_build_error() {
        let err = PolicyRegistry::default()
            .build(&config("fs_watcher", "/tmp/a"))
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::Build {
                cause: ConfigError::MissingRuntime(_),
                ..
            }
        ));
    }

    #[test]
    fn custom_policies_can_be_registered() {
        let mut registry = PolicyRegistry::empty(AdapterRegistry::default());
        registry.register("nightly", build_simple);
        assert_eq!(registry.names(), vec!["nightly"]);
        assert!(registry.build(&config("nightly", "/tmp/a")).is_ok());
    }
}
