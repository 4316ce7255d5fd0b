#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use intake_core::{DiscoveredFile, DiscoveryStream, SourceConfig};

pub const NUMBERED_TXT: &str = r"^[0-9]+\.txt$";

pub fn options(uris: &[String], policy: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("fs.uris".to_string(), uris.join(",")),
        ("topic".to_string(), "topic_test".to_string()),
        ("policy.class".to_string(), policy.to_string()),
        ("file_reader.class".to_string(), "text".to_string()),
        ("policy.regexp".to_string(), NUMBERED_TXT.to_string()),
    ])
}

pub fn config(uris: &[String], policy: &str, extra: &[(&str, &str)]) -> SourceConfig {
    let mut map = options(uris, policy);
    for (key, value) in extra {
        map.insert(key.to_string(), value.to_string());
    }
    SourceConfig::from_map(map).expect("valid test config")
}

pub fn uri(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, contents).expect("write test file");
}

/// Next discovered file, failing the test after five seconds.
pub async fn next_file(stream: &mut DiscoveryStream) -> DiscoveredFile {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("a file is discovered in time")
        .expect("discovery stream still open")
}

pub fn file_names(files: &[DiscoveredFile]) -> Vec<String> {
    let mut names: Vec<String> = files
        .iter()
        .filter_map(|file| file.path().file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
