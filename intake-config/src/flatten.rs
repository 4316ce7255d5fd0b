//! Turns nested TOML/JSON documents into the flat dotted option map.
//!
//! `[policy.fs_watcher] poll_ms = 500` becomes `policy.fs_watcher.poll_ms =
//! "500"`; arrays of scalars are joined with commas so `fs.uris = ["/a",
//! "/b"]` reads the same as `fs.uris = "/a,/b"`.

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};

pub type OptionMap = BTreeMap<String, String>;

/// Parse a document, picking the format from `extension` when known and
/// trying TOML then JSON otherwise.
pub fn parse_document(contents: &str, extension: Option<&str>) -> anyhow::Result<OptionMap> {
    match extension {
        Some("json") => parse_json(contents),
        Some("toml") | Some("tml") => parse_toml(contents),
        _ => parse_toml(contents).or_else(|toml_err| {
            parse_json(contents)
                .map_err(|json_err| anyhow!("toml error: {toml_err}; json error: {json_err}"))
        }),
    }
}

pub fn parse_toml(contents: &str) -> anyhow::Result<OptionMap> {
    let table: toml::Table = toml::from_str(contents).context("invalid toml")?;
    let mut options = OptionMap::new();
    for (key, value) in table {
        flatten_toml(&mut options, key, value);
    }
    Ok(options)
}

pub fn parse_json(contents: &str) -> anyhow::Result<OptionMap> {
    let value: serde_json::Value = serde_json::from_str(contents).context("invalid json")?;
    let serde_json::Value::Object(object) = value else {
        return Err(anyhow!("top-level json value must be an object"));
    };
    let mut options = OptionMap::new();
    for (key, value) in object {
        flatten_json(&mut options, key, value);
    }
    Ok(options)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten_toml(options: &mut OptionMap, key: String, value: toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (child, value) in table {
                flatten_toml(options, join(&key, &child), value);
            }
        }
        toml::Value::Array(items) => {
            let joined = items
                .into_iter()
                .map(|item| toml_scalar(item))
                .collect::<Vec<_>>()
                .join(",");
            options.insert(key, joined);
        }
        scalar => {
            options.insert(key, toml_scalar(scalar));
        }
    }
}

fn toml_scalar(value: toml::Value) -> String {
    match value {
        toml::Value::String(value) => value,
        toml::Value::Integer(value) => value.to_string(),
        toml::Value::Float(value) => value.to_string(),
        toml::Value::Boolean(value) => value.to_string(),
        toml::Value::Datetime(value) => value.to_string(),
        other => other.to_string(),
    }
}

fn flatten_json(options: &mut OptionMap, key: String, value: serde_json::Value) {
    match value {
        serde_json::Value::Object(object) => {
            for (child, value) in object {
                flatten_json(options, join(&key, &child), value);
            }
        }
        serde_json::Value::Array(items) => {
            let joined = items
                .into_iter()
                .map(json_scalar)
                .collect::<Vec<_>>()
                .join(",");
            options.insert(key, joined);
        }
        serde_json::Value::Null => {}
        scalar => {
            options.insert(key, json_scalar(scalar));
        }
    }
}

fn json_scalar(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(value) => value,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_toml() {
        let options = parse_toml(
            r#"
            topic = "ingest"

            [fs]
            uris = ["/data/a", "/data/b"]

            [policy]
            class = "fs_watcher"
            recursive = false

            [policy.fs_watcher]
            poll_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(options["topic"], "ingest");
        assert_eq!(options["fs.uris"], "/data/a,/data/b");
        assert_eq!(options["policy.class"], "fs_watcher");
        assert_eq!(options["policy.recursive"], "false");
        assert_eq!(options["policy.fs_watcher.poll_ms"], "500");
    }

    #[test]
    fn flattens_json_and_drops_nulls() {
        let options = parse_json(
            r#"{"fs": {"uris": "/data"}, "policy": {"sleepy": {"sleep": 10, "max_execs": null}}}"#,
        )
        .unwrap();
        assert_eq!(options["fs.uris"], "/data");
        assert_eq!(options["policy.sleepy.sleep"], "10");
        assert!(!options.contains_key("policy.sleepy.max_execs"));
    }

    #[test]
    fn unknown_extension_tries_both_formats() {
        assert!(parse_document(r#"topic = "t""#, None).is_ok());
        assert!(parse_document(r#"{"topic": "t"}"#, None).is_ok());
        let err = parse_document("topic: t", None).unwrap_err();
        assert!(err.to_string().contains("json error"));
        assert!(parse_json("[1, 2]").is_err());
    }
}
