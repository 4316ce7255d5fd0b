use std::path::Path;
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::error::ConfigError;
use crate::fs::FsEntry;

/// Outcome of checking one entry against a [`SelectionRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    /// Passes every check except the minimum age, which it reaches after the
    /// given wait.
    TooYoung(Duration),
}

/// Decides which listed entries are candidates: plain files whose basename
/// matches the pattern and that pass the optional size and age filters.
#[derive(Debug, Clone)]
pub struct SelectionRule {
    pattern: Regex,
    min_size: Option<u64>,
    max_size: Option<u64>,
    min_age: Option<Duration>,
}

impl SelectionRule {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let compiled = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            min_size: None,
            max_size: None,
            min_age: None,
        })
    }

    pub fn with_min_size(mut self, bytes: u64) -> Self {
        self.min_size = Some(bytes);
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Only accept files last modified at least `age` ago.
    pub fn with_min_age(mut self, age: Duration) -> Self {
        self.min_age = Some(age);
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.is_match(name))
    }

    pub fn accepts(&self, entry: &FsEntry) -> bool {
        self.verdict(entry) == Verdict::Accept
    }

    /// Like [`SelectionRule::accepts`], but tells a file that is only too
    /// young apart from one that never matches.
    pub fn verdict(&self, entry: &FsEntry) -> Verdict {
        let matches = entry.is_file()
            && self.matches_name(&entry.path)
            && self.min_size.is_none_or(|min| entry.len >= min)
            && self.max_size.is_none_or(|max| entry.len <= max);
        if !matches {
            return Verdict::Reject;
        }
        match self.remaining_age(entry.modified) {
            Some(wait) => Verdict::TooYoung(wait),
            None => Verdict::Accept,
        }
    }

    // Unknown modification times pass.
    fn remaining_age(&self, modified: Option<SystemTime>) -> Option<Duration> {
        let (min_age, modified) = (self.min_age?, modified?);
        let remaining = match SystemTime::now().duration_since(modified) {
            Ok(age) => min_age.checked_sub(age)?,
            // Modified in the future: wait for the clock to catch up as well.
            Err(ahead) => min_age.saturating_add(ahead.duration()),
        };
        (!remaining.is_zero()).then_some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::fs::EntryKind;

    fn file(path: &str, len: u64) -> FsEntry {
        FsEntry {
            path: PathBuf::from(path),
            kind: EntryKind::File,
            len,
            modified: Some(SystemTime::now()),
        }
    }

    #[test]
    fn matches_basename_only() {
        let rule = SelectionRule::new(r"^[0-9]+\.txt$").unwrap();
        assert!(rule.accepts(&file("/data/a/1.txt", 0)));
        assert!(rule.accepts(&file("/data/123/42.txt", 0)));
        assert!(!rule.accepts(&file("/data/a/x.txt", 0)));
        assert!(!rule.accepts(&file("/data/1.txt/x.txt", 0)));
    }

    #[test]
    fn directories_never_match() {
        let rule = SelectionRule::new(".*").unwrap();
        let dir = FsEntry {
            kind: EntryKind::Dir,
            ..file("/data/1.txt", 0)
        };
        assert!(!rule.accepts(&dir));
    }

    #[test]
    fn size_and_age_filters() {
        let rule = SelectionRule::new(".*")
            .unwrap()
            .with_min_size(2)
            .with_max_size(4);
        assert!(!rule.accepts(&file("/a", 1)));
        assert!(rule.accepts(&file("/a", 3)));
        assert!(!rule.accepts(&file("/a", 5)));

        let aged = SelectionRule::new(".*")
            .unwrap()
            .with_min_age(Duration::from_secs(60));
        assert!(!aged.accepts(&file("/a", 0)));
        let old = FsEntry {
            modified: SystemTime::now().checked_sub(Duration::from_secs(120)),
            ..file("/a", 0)
        };
        assert!(aged.accepts(&old));
        let unknown = FsEntry {
            modified: None,
            ..file("/a", 0)
        };
        assert!(aged.accepts(&unknown));
    }

    #[test]
    fn young_files_report_the_remaining_wait() {
        let rule = SelectionRule::new(r"^[0-9]+\.txt$")
            .unwrap()
            .with_min_age(Duration::from_secs(60));

        let young = FsEntry {
            modified: SystemTime::now().checked_sub(Duration::from_secs(20)),
            ..file("/a/1.txt", 0)
        };
        match rule.verdict(&young) {
            Verdict::TooYoung(wait) => {
                assert!(wait <= Duration::from_secs(40));
                assert!(wait > Duration::from_secs(30));
            }
            other => panic!("expected a young file, got {other:?}"),
        }

        // Name mismatches are rejected outright, whatever their age.
        assert_eq!(rule.verdict(&file("/a/x.txt", 0)), Verdict::Reject);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(matches!(
            SelectionRule::new("(unclosed"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
