//! Typed view over the flat option map handed to the policy registry.
//!
//! Loading the map (files, environment, CLI overrides) lives in
//! `intake-config`; this module only validates the keys every policy shares.
//! Policy-specific tunables are read through [`Tunables`] by the policy that
//! owns them, so each policy rejects its own bad values while it is built.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::selection::SelectionRule;

/// Option keys understood by the engine.
pub mod keys {
    pub const FS_URIS: &str = "fs.uris";
    pub const TOPIC: &str = "topic";
    pub const POLICY_CLASS: &str = "policy.class";
    pub const FILE_READER_CLASS: &str = "file_reader.class";
    pub const POLICY_REGEXP: &str = "policy.regexp";
    pub const POLICY_RECURSIVE: &str = "policy.recursive";
    pub const POLICY_PREFIX: &str = "policy.";
    pub const POLICY_PREFIX_FS: &str = "policy.fs.";
    pub const FILTER_MIN_SIZE: &str = "policy.filter.min_size";
    pub const FILTER_MAX_SIZE: &str = "policy.filter.max_size";
    pub const FILTER_MIN_AGE_MS: &str = "policy.filter.min_age_ms";
}

const DEFAULT_REGEXP: &str = ".*";

/// Validated source configuration shared by every policy.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    uris: Vec<String>,
    topic: String,
    policy_class: String,
    file_reader_class: String,
    regexp: String,
    recursive: bool,
    min_size: Option<u64>,
    max_size: Option<u64>,
    min_age: Option<Duration>,
    fs_options: BTreeMap<String, String>,
    originals: BTreeMap<String, String>,
}

impl SourceConfig {
    pub fn from_map(originals: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let uris: Vec<String> = required(&originals, keys::FS_URIS)?
            .split(',')
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(str::to_string)
            .collect();
        if uris.is_empty() {
            return Err(ConfigError::invalid(
                keys::FS_URIS,
                originals.get(keys::FS_URIS).cloned().unwrap_or_default(),
                "at least one root uri is required",
            ));
        }

        let topic = required(&originals, keys::TOPIC)?.to_string();
        let policy_class = required(&originals, keys::POLICY_CLASS)?.to_string();
        let file_reader_class = required(&originals, keys::FILE_READER_CLASS)?.to_string();
        let regexp = originals
            .get(keys::POLICY_REGEXP)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_REGEXP.to_string());

        let tunables = Tunables::new(&originals);
        let recursive = tunables.bool_or(keys::POLICY_RECURSIVE, true)?;
        let min_size = tunables.optional_u64(keys::FILTER_MIN_SIZE)?;
        let max_size = tunables.optional_u64(keys::FILTER_MAX_SIZE)?;
        let min_age = tunables
            .optional_u64(keys::FILTER_MIN_AGE_MS)?
            .map(Duration::from_millis);

        if let (Some(min), Some(max)) = (min_size, max_size)
            && min > max
        {
            return Err(ConfigError::invalid(
                keys::FILTER_MAX_SIZE,
                max.to_string(),
                format!("must not be smaller than {} ({min})", keys::FILTER_MIN_SIZE),
            ));
        }

        let fs_options = originals
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(keys::POLICY_PREFIX_FS)
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect();

        Ok(Self {
            uris,
            topic,
            policy_class,
            file_reader_class,
            regexp,
            recursive,
            min_size,
            max_size,
            min_age,
            fs_options,
            originals,
        })
    }

    /// Re-validate with one option replaced.
    pub fn with_option(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let mut originals = self.originals.clone();
        originals.insert(key.into(), value.into());
        Self::from_map(originals)
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn policy_class(&self) -> &str {
        &self.policy_class
    }

    pub fn file_reader_class(&self) -> &str {
        &self.file_reader_class
    }

    pub fn regexp(&self) -> &str {
        &self.regexp
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    /// Adapter options with the `policy.fs.` prefix stripped.
    pub fn fs_options(&self) -> &BTreeMap<String, String> {
        &self.fs_options
    }

    /// Every `policy.*` option, keys unchanged.
    pub fn policy_options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.originals
            .iter()
            .filter(|(key, _)| key.starts_with(keys::POLICY_PREFIX))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn originals(&self) -> &BTreeMap<String, String> {
        &self.originals
    }

    pub fn tunables(&self) -> Tunables<'_> {
        Tunables::new(&self.originals)
    }

    pub fn selection_rule(&self) -> Result<SelectionRule, ConfigError> {
        let mut rule = SelectionRule::new(&self.regexp)?;
        if let Some(min) = self.min_size {
            rule = rule.with_min_size(min);
        }
        if let Some(max) = self.max_size {
            rule = rule.with_max_size(max);
        }
        if let Some(age) = self.min_age {
            rule = rule.with_min_age(age);
        }
        Ok(rule)
    }
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, ConfigError> {
    map.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Typed accessors for policy tunables.
#[derive(Debug, Clone, Copy)]
pub struct Tunables<'a> {
    map: &'a BTreeMap<String, String>,
}

impl<'a> Tunables<'a> {
    pub fn new(map: &'a BTreeMap<String, String>) -> Self {
        Self { map }
    }

    pub fn raw(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.raw(key).map(|raw| parse_u64(key, raw)).transpose()
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        Ok(self.optional_u64(key)?.unwrap_or(default))
    }

    pub fn required_u64(&self, key: &str) -> Result<u64, ConfigError> {
        self.optional_u64(key)?
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional_u64(key)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.raw(key) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|err| ConfigError::invalid(key, raw, err.to_string())),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.raw(key)
            .map(|raw| parse_bool(key, raw))
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    pub fn optional_datetime(&self, key: &str) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.raw(key)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|err| ConfigError::invalid(key, raw, err.to_string()))
            })
            .transpose()
    }
}

/// Non-negative integer tunable.
pub fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::invalid(key, raw, format!("expected a non-negative integer ({err})")))
}

pub fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BTreeMap<String, String> {
        BTreeMap::from([
            (keys::FS_URIS.to_string(), "/data/a, /data/b".to_string()),
            (keys::TOPIC.to_string(), "topic_test".to_string()),
            (keys::POLICY_CLASS.to_string(), "simple".to_string()),
            (keys::FILE_READER_CLASS.to_string(), "text".to_string()),
            (keys::POLICY_REGEXP.to_string(), r"^[0-9]+\.txt$".to_string()),
            ("policy.fs.native_watch".to_string(), "false".to_string()),
        ])
    }

    #[test]
    fn parses_shared_options() {
        let config = SourceConfig::from_map(base()).unwrap();
        assert_eq!(config.uris(), ["/data/a", "/data/b"]);
        assert_eq!(config.topic(), "topic_test");
        assert!(config.recursive());
        assert_eq!(
            config.fs_options().get("native_watch").map(String::as_str),
            Some("false")
        );
        assert!(config.policy_options().any(|(key, _)| key == keys::POLICY_CLASS));
        assert!(config.selection_rule().is_ok());
    }

    #[test]
    fn missing_required_keys_are_reported_by_name() {
        for key in [keys::FS_URIS, keys::TOPIC, keys::POLICY_CLASS, keys::FILE_READER_CLASS] {
            let mut map = base();
            map.remove(key);
            match SourceConfig::from_map(map) {
                Err(ConfigError::Missing(missing)) => assert_eq!(missing, key),
                other => panic!("expected missing {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_blank_uri_list_and_bad_filters() {
        let config = SourceConfig::from_map(base()).unwrap();
        assert!(config.with_option(keys::FS_URIS, " , ").is_err());
        assert!(config.with_option(keys::FILTER_MIN_SIZE, "-1").is_err());
        assert!(config.with_option(keys::POLICY_RECURSIVE, "sometimes").is_err());

        let inverted = config
            .with_option(keys::FILTER_MIN_SIZE, "10")
            .and_then(|c| c.with_option(keys::FILTER_MAX_SIZE, "5"));
        assert!(matches!(inverted, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn tunables_validate_integers() {
        let map = BTreeMap::from([
            ("a".to_string(), "15".to_string()),
            ("b".to_string(), "invalid".to_string()),
            ("c".to_string(), "-1".to_string()),
            ("d".to_string(), "2030-01-01T00:00:00Z".to_string()),
        ]);
        let tunables = Tunables::new(&map);
        assert_eq!(tunables.u64_or("a", 0).unwrap(), 15);
        assert_eq!(tunables.u64_or("missing", 7).unwrap(), 7);
        assert!(tunables.u64_or("b", 0).is_err());
        assert!(tunables.u64_or("c", 0).is_err());
        assert_eq!(tunables.i64_or("c", 0).unwrap(), -1);
        assert!(tunables.required_u64("missing").is_err());
        assert!(tunables.optional_datetime("d").unwrap().is_some());
        assert!(tunables.optional_datetime("b").is_err());
    }
}
