use std::collections::BTreeMap;
use std::fs;

use intake_config::{ConfigLoadError, ConfigLoader, ConfigSource};
use intake_core::ConfigError;
use tempfile::TempDir;

const BASE_TOML: &str = r#"
topic = "ingest"

[fs]
uris = ["/data/a", "/data/b"]

[policy]
class = "fs_watcher"
regexp = '^.*\.csv$'

[policy.fs_watcher]
poll_ms = 500

[file_reader]
class = "text"
"#;

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn default_location_is_found_in_the_search_dir() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/intake.toml"), BASE_TOML).unwrap();

    let load = ConfigLoader::new()
        .with_search_dir(tmp.path())
        .load_with_env(BTreeMap::new())
        .unwrap();

    assert_eq!(
        load.sources,
        vec![ConfigSource::File(tmp.path().join("config/intake.toml"))]
    );
    let config = load.source_config().unwrap();
    assert_eq!(config.uris(), ["/data/a", "/data/b"]);
    assert_eq!(config.policy_class(), "fs_watcher");
    assert_eq!(config.regexp(), r"^.*\.csv$");
    assert_eq!(
        config.tunables().raw("policy.fs_watcher.poll_ms"),
        Some("500")
    );
}

#[test]
fn layers_apply_in_precedence_order() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("source.toml");
    fs::write(&path, BASE_TOML).unwrap();

    let load = ConfigLoader::new()
        .with_config_path(&path)
        .with_search_dir(tmp.path())
        .with_override("policy.fs_watcher.poll_ms", "50")
        .load_with_env(env(&[
            ("INTAKE_CONFIG_JSON", r#"{"topic": "inline", "policy": {"recursive": false}}"#),
            ("INTAKE__TOPIC", "from-env"),
            ("INTAKE__POLICY__FS_WATCHER__POLL_MS", "75"),
        ]))
        .unwrap();

    assert_eq!(
        load.sources,
        vec![
            ConfigSource::File(path),
            ConfigSource::EnvInline,
            ConfigSource::Environment,
            ConfigSource::Overrides,
        ]
    );
    let config = load.source_config().unwrap();
    assert_eq!(config.topic(), "from-env");
    assert!(!config.recursive());
    assert_eq!(config.tunables().raw("policy.fs_watcher.poll_ms"), Some("50"));
}

#[test]
fn env_file_fills_gaps_without_overriding_the_environment() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".env"),
        "INTAKE__FS__URIS=/from/dotenv\nINTAKE__TOPIC=dotenv-topic\n",
    )
    .unwrap();

    let load = ConfigLoader::new()
        .with_search_dir(tmp.path())
        .with_override("policy.class", "simple")
        .with_override("file_reader.class", "text")
        .load_with_env(env(&[("INTAKE__TOPIC", "real-topic")]))
        .unwrap();

    assert_eq!(load.sources[0], ConfigSource::EnvFile(tmp.path().join(".env")));
    let config = load.source_config().unwrap();
    assert_eq!(config.uris(), ["/from/dotenv"]);
    assert_eq!(config.topic(), "real-topic");
}

#[test]
fn env_path_points_at_a_json_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("elsewhere.json");
    fs::write(
        &path,
        r#"{"fs": {"uris": "/data"}, "topic": "t", "policy": {"class": "sleepy"},
            "file_reader": {"class": "text"}}"#,
    )
    .unwrap();

    let load = ConfigLoader::new()
        .with_search_dir(tmp.path())
        .load_with_env(env(&[("INTAKE_CONFIG_PATH", path.to_str().unwrap())]))
        .unwrap();
    assert_eq!(load.source_config().unwrap().policy_class(), "sleepy");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let err = ConfigLoader::new()
        .with_config_path(tmp.path().join("absent.toml"))
        .with_search_dir(tmp.path())
        .load_with_env(BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_documents_report_their_origin() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "topic = ").unwrap();

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .with_search_dir(tmp.path())
        .load_with_env(BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { ref origin, .. } if origin.ends_with("broken.toml")));

    let err = ConfigLoader::new()
        .with_search_dir(tmp.path())
        .load_with_env(env(&[("INTAKE_CONFIG_JSON", "not json")]))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn incomplete_options_fail_validation() {
    let tmp = TempDir::new().unwrap();
    let load = ConfigLoader::new()
        .with_search_dir(tmp.path())
        .with_override("topic", "t")
        .load_with_env(BTreeMap::new())
        .unwrap();
    assert!(matches!(
        load.source_config(),
        Err(ConfigLoadError::Invalid(ConfigError::Missing(_)))
    ));
}
