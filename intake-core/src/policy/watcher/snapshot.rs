use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::fs::FsEntry;

/// Last seen `(len, modified)` of every file under a root, used by the
/// polling fallback to turn two listings into a change set.
#[derive(Debug, Default)]
pub struct Snapshot {
    files: HashMap<PathBuf, (u64, Option<SystemTime>)>,
}

impl Snapshot {
    pub fn new(entries: impl IntoIterator<Item = FsEntry>) -> Self {
        let mut snapshot = Self::default();
        snapshot.refresh(entries);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop `path` so the next refresh reports it again.
    pub fn forget(&mut self, path: &Path) {
        self.files.remove(path);
    }

    /// Replace the snapshot with `entries`, returning the ones that are new
    /// or changed since the previous listing, in listing order.
    pub fn refresh(&mut self, entries: impl IntoIterator<Item = FsEntry>) -> Vec<FsEntry> {
        let mut previous = std::mem::take(&mut self.files);
        let mut changed = Vec::new();
        for entry in entries.into_iter().filter(FsEntry::is_file) {
            let fingerprint = (entry.len, entry.modified);
            if previous.remove(&entry.path) != Some(fingerprint) {
                changed.push(entry.clone());
            }
            self.files.insert(entry.path, fingerprint);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fs::EntryKind;

    fn file(path: &str, len: u64, secs: u64) -> FsEntry {
        FsEntry {
            path: PathBuf::from(path),
            kind: EntryKind::File,
            len,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    #[test]
    fn reports_new_and_changed_files_only() {
        let mut snapshot = Snapshot::new([file("/r/1.txt", 1, 1), file("/r/2.txt", 2, 1)]);
        assert_eq!(snapshot.len(), 2);

        let changed = snapshot.refresh([
            file("/r/1.txt", 1, 1),
            file("/r/2.txt", 5, 2),
            file("/r/3.txt", 3, 3),
        ]);
        let paths: Vec<_> = changed.iter().map(|entry| entry.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/r/2.txt"), PathBuf::from("/r/3.txt")]);

        // A deleted then re-created file counts as new.
        assert!(snapshot.refresh([file("/r/3.txt", 3, 3)]).is_empty());
        assert_eq!(snapshot.refresh([file("/r/1.txt", 1, 1), file("/r/3.txt", 3, 3)]).len(), 1);
    }

    #[test]
    fn forgotten_files_are_reported_again() {
        let mut snapshot = Snapshot::new([file("/r/1.txt", 1, 1)]);
        assert!(snapshot.refresh([file("/r/1.txt", 1, 1)]).is_empty());

        snapshot.forget(Path::new("/r/1.txt"));
        assert_eq!(snapshot.refresh([file("/r/1.txt", 1, 1)]).len(), 1);
    }
}
