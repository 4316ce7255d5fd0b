use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ChangeSubscription, EntryKind, FileReader, FileSystem, FsEntry, RootUri};
use crate::config::parse_bool;
use crate::error::{ConfigError, FsError};

/// Adapter option toggling native change notifications.
pub const NATIVE_WATCH_OPTION: &str = "native_watch";

/// Local filesystem backed by `tokio::fs`, with `notify` watchers for change
/// notifications.
#[derive(Debug, Clone)]
pub struct LocalFs {
    native_watch: bool,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFs {
    pub fn new() -> Self {
        Self {
            native_watch: cfg!(feature = "native-watch"),
        }
    }

    /// Disable native notifications to force the polling watcher.
    pub fn with_native_watch(mut self, enabled: bool) -> Self {
        self.native_watch = enabled && cfg!(feature = "native-watch");
        self
    }

    /// Connector registered for the `file` scheme.
    pub fn connect(
        uri: &RootUri,
        options: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn FileSystem>, ConfigError> {
        let mut fs = Self::new();
        if let Some(raw) = options.get(NATIVE_WATCH_OPTION) {
            let key = format!("{}{}", crate::config::keys::POLICY_PREFIX_FS, NATIVE_WATCH_OPTION);
            fs = fs.with_native_watch(parse_bool(&key, raw)?);
        }
        debug!(root = %uri, native_watch = fs.native_watch, "local filesystem adapter ready");
        Ok(Arc::new(fs))
    }
}

fn entry_from_metadata(path: PathBuf, md: &Metadata) -> FsEntry {
    let kind = if md.is_file() {
        EntryKind::File
    } else if md.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::Other
    };
    FsEntry {
        path,
        kind,
        len: md.len(),
        modified: md.modified().ok(),
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn exists(&self, path: &Path) -> Result<bool, FsError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|err| FsError::io(path, err))
    }

    async fn list(&self, path: &Path) -> Result<Vec<FsEntry>, FsError> {
        let mut rd = tokio::fs::read_dir(path)
            .await
            .map_err(|err| FsError::io(path, err))?;

        let mut entries = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|err| FsError::io(path, err))?
        {
            let entry_path = entry.path();
            // Follows symlinks so linked files are listed as files.
            match tokio::fs::metadata(&entry_path).await {
                Ok(md) => entries.push(entry_from_metadata(entry_path, &md)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %entry_path.display(), "entry vanished while listing");
                }
                Err(err) => return Err(FsError::io(entry_path, err)),
            }
        }
        Ok(entries)
    }

    async fn metadata(&self, path: &Path) -> Result<FsEntry, FsError> {
        let md = tokio::fs::metadata(path)
            .await
            .map_err(|err| FsError::io(path, err))?;
        Ok(entry_from_metadata(path.to_path_buf(), &md))
    }

    async fn open(&self, path: &Path) -> Result<FileReader, FsError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| FsError::io(path, err))?;
        Ok(Box::pin(file))
    }

    async fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
    ) -> Result<Option<ChangeSubscription>, FsError> {
        if !self.native_watch {
            return Ok(None);
        }
        native::subscribe(path, recursive).map(Some)
    }
}

#[cfg(feature = "native-watch")]
mod native {
    use std::path::{Path, PathBuf};

    use futures::StreamExt;
    use futures::channel::mpsc;
    use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
    use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use tracing::warn;

    use crate::error::FsError;
    use crate::fs::{ChangeEvent, ChangeKind, ChangeSubscription};

    pub(super) fn subscribe(path: &Path, recursive: bool) -> Result<ChangeSubscription, FsError> {
        let (tx, rx) = mpsc::unbounded::<Result<ChangeEvent, FsError>>();
        let root = path.to_path_buf();
        let watch_path = root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in convert_event(event) {
                        if tx.unbounded_send(Ok(change)).is_err() {
                            // Subscriber dropped; the watcher follows shortly.
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(root = %watch_path.display(), error = %err, "native watcher error");
                    let _ = tx.unbounded_send(Err(FsError::Watch {
                        path: watch_path.clone(),
                        reason: err.to_string(),
                    }));
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| watch_error(&root, err))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root, mode)
            .map_err(|err| watch_error(&root, err))?;

        Ok(ChangeSubscription::new(rx.boxed()).with_guard(watcher))
    }

    fn watch_error(path: &Path, err: notify::Error) -> FsError {
        match err.kind {
            notify::ErrorKind::PathNotFound => FsError::NotFound(path.to_path_buf()),
            notify::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                FsError::NotFound(path.to_path_buf())
            }
            _ => FsError::Watch {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        }
    }

    pub(super) fn convert_event(event: Event) -> Vec<ChangeEvent> {
        if event.need_rescan() {
            let path = event.paths.first().cloned().unwrap_or_default();
            return vec![ChangeEvent::new(ChangeKind::Overflow, path)];
        }

        let mut paths = event.paths.into_iter();
        let Some(first) = paths.next() else {
            return match event.kind {
                EventKind::Other => vec![ChangeEvent::new(ChangeKind::Overflow, PathBuf::new())],
                _ => Vec::new(),
            };
        };

        match event.kind {
            EventKind::Create(_) => vec![ChangeEvent::new(ChangeKind::Created, first)],
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                vec![ChangeEvent::new(ChangeKind::Closed, first)]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut changes = vec![ChangeEvent::new(ChangeKind::Removed, first)];
                if let Some(dest) = paths.next() {
                    changes.push(ChangeEvent::new(ChangeKind::Renamed, dest));
                }
                changes
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                vec![ChangeEvent::new(ChangeKind::Removed, first)]
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                vec![ChangeEvent::new(ChangeKind::Renamed, first)]
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) => vec![ChangeEvent::new(ChangeKind::Modified, first)],
            EventKind::Remove(_) => vec![ChangeEvent::new(ChangeKind::Removed, first)],
            EventKind::Other => vec![ChangeEvent::new(ChangeKind::Overflow, first)],
            EventKind::Access(_) | EventKind::Any => Vec::new(),
        }
    }

    #[cfg(test)]
    mod tests {
        use notify::event::{CreateKind, DataChange, RemoveKind};

        use super::*;

        fn event(kind: EventKind, paths: &[&str]) -> Event {
            paths
                .iter()
                .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
        }

        #[test]
        fn maps_writes_and_renames() {
            let created = convert_event(event(EventKind::Create(CreateKind::File), &["/d/1.txt"]));
            assert_eq!(created, vec![ChangeEvent::new(ChangeKind::Created, "/d/1.txt")]);

            let closed = convert_event(event(
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                &["/d/1.txt"],
            ));
            assert_eq!(closed[0].kind, ChangeKind::Closed);

            let data = convert_event(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/d/1.txt"],
            ));
            assert_eq!(data[0].kind, ChangeKind::Modified);

            let renamed = convert_event(event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/d/1.txt.tmp", "/d/1.txt"],
            ));
            assert_eq!(
                renamed,
                vec![
                    ChangeEvent::new(ChangeKind::Removed, "/d/1.txt.tmp"),
                    ChangeEvent::new(ChangeKind::Renamed, "/d/1.txt"),
                ]
            );
        }

        #[test]
        fn ignores_reads_and_metadata() {
            assert!(
                convert_event(event(
                    EventKind::Access(AccessKind::Close(AccessMode::Read)),
                    &["/d/1.txt"]
                ))
                .is_empty()
            );
            assert!(
                convert_event(event(
                    EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Any)),
                    &["/d/1.txt"]
                ))
                .is_empty()
            );
            let removed = convert_event(event(EventKind::Remove(RemoveKind::Folder), &["/d"]));
            assert_eq!(removed[0].kind, ChangeKind::Removed);
        }
    }
}

#[cfg(not(feature = "native-watch"))]
mod native {
    use std::path::Path;

    use crate::error::FsError;
    use crate::fs::ChangeSubscription;

    pub(super) fn subscribe(path: &Path, _recursive: bool) -> Result<ChangeSubscription, FsError> {
        Err(FsError::Unsupported(format!(
            "native watch for {} (built without `native-watch`)",
            path.display()
        )))
    }
}
