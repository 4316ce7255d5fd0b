//! In-process filesystem volumes.
//!
//! A [`MemoryVolume`] is mounted under a name and reached through
//! `memory://<name>/<path>` roots. Roots naming a volume that is not mounted
//! behave like an unreachable remote filesystem, which makes the volumes
//! useful both for tests and for staging pipelines without touching disk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    ChangeEvent, ChangeKind, ChangeSubscription, EntryKind, FileReader, FileSystem, FsEntry,
    RootUri,
};
use crate::error::{ConfigError, FsError};

/// Scheme served by [`MemoryFs`].
pub const MEMORY_SCHEME: &str = "memory";

const EVENT_CAPACITY: usize = 1024;

static VOLUMES: LazyLock<RwLock<HashMap<String, MemoryVolume>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

#[derive(Clone)]
enum Node {
    Dir,
    File {
        data: Arc<Vec<u8>>,
        modified: SystemTime,
    },
}

struct VolumeInner {
    name: String,
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
    events: broadcast::Sender<ChangeEvent>,
    reachable: AtomicBool,
}

/// A named in-memory volume. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryVolume {
    inner: Arc<VolumeInner>,
}

impl fmt::Debug for MemoryVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self
            .inner
            .nodes
            .try_read()
            .map(|guard| guard.len())
            .unwrap_or_default();
        f.debug_struct("MemoryVolume")
            .field("name", &self.inner.name)
            .field("nodes", &nodes)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

impl MemoryVolume {
    /// Create a volume and register it under `name`, replacing any previous
    /// volume with the same name.
    pub fn mount(name: impl Into<String>) -> Self {
        let name = name.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::from("/"), Node::Dir);
        let volume = Self {
            inner: Arc::new(VolumeInner {
                name: name.clone(),
                nodes: RwLock::new(nodes),
                events,
                reachable: AtomicBool::new(true),
            }),
        };
        VOLUMES
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, volume.clone());
        volume
    }

    /// Look up a mounted volume.
    pub fn get(name: &str) -> Option<Self> {
        VOLUMES
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove the volume from the registry; roots naming it become
    /// unreachable.
    pub fn unmount(&self) {
        let mut volumes = VOLUMES.write().unwrap_or_else(PoisonError::into_inner);
        if volumes
            .get(&self.inner.name)
            .is_some_and(|current| Arc::ptr_eq(&current.inner, &self.inner))
        {
            volumes.remove(&self.inner.name);
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Simulate a network partition.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut created = Vec::new();
        {
            let mut nodes = self.write_nodes();
            for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
                if ancestor.as_os_str().is_empty() {
                    continue;
                }
                if !nodes.contains_key(ancestor) {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                    created.push(ancestor.to_path_buf());
                }
            }
        }
        for dir in created {
            self.publish(ChangeKind::Created, dir);
        }
    }

    /// Write (or overwrite) a file, creating parent directories. Publishes a
    /// `Created` event for new files followed by `Closed`.
    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent);
        }
        let existed = {
            let mut nodes = self.write_nodes();
            nodes
                .insert(
                    path.to_path_buf(),
                    Node::File {
                        data: Arc::new(contents.into()),
                        modified: SystemTime::now(),
                    },
                )
                .is_some()
        };
        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Created
        };
        self.publish(kind, path.to_path_buf());
        self.publish(ChangeKind::Closed, path.to_path_buf());
    }

    /// Move a file or directory subtree.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> bool {
        let (from, to) = (from.as_ref(), to.as_ref());
        if let Some(parent) = to.parent() {
            self.create_dir_all(parent);
        }
        let moved = {
            let mut nodes = self.write_nodes();
            let keys: Vec<PathBuf> = nodes
                .keys()
                .filter(|key| key.starts_with(from))
                .cloned()
                .collect();
            for key in &keys {
                if let Some(node) = nodes.remove(key) {
                    let target = match key.strip_prefix(from) {
                        Ok(suffix) if !suffix.as_os_str().is_empty() => to.join(suffix),
                        _ => to.to_path_buf(),
                    };
                    nodes.insert(target, node);
                }
            }
            !keys.is_empty()
        };
        if moved {
            self.publish(ChangeKind::Removed, from.to_path_buf());
            self.publish(ChangeKind::Renamed, to.to_path_buf());
        }
        moved
    }

    /// Remove a path and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let removed = {
            let mut nodes = self.write_nodes();
            let before = nodes.len();
            nodes.retain(|key, _| !key.starts_with(path) || key == Path::new("/"));
            before != nodes.len()
        };
        if removed {
            self.publish(ChangeKind::Removed, path.to_path_buf());
        }
        removed
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.read_nodes().contains_key(path.as_ref())
    }

    fn publish(&self, kind: ChangeKind, path: PathBuf) {
        // No receivers is fine.
        let _ = self.inner.events.send(ChangeEvent::new(kind, path));
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PathBuf, Node>> {
        self.inner.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PathBuf, Node>> {
        self.inner
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, path: &Path) -> Option<FsEntry> {
        self.read_nodes().get(path).map(|node| node_entry(path, node))
    }
}

fn node_entry(path: &Path, node: &Node) -> FsEntry {
    match node {
        Node::Dir => FsEntry {
            path: path.to_path_buf(),
            kind: EntryKind::Dir,
            len: 0,
            modified: None,
        },
        Node::File { data, modified } => FsEntry {
            path: path.to_path_buf(),
            kind: EntryKind::File,
            len: data.len() as u64,
            modified: Some(*modified),
        },
    }
}

/// Adapter resolving a `memory://<volume>` root on every call, so volumes
/// mounted after the policy was built become reachable.
#[derive(Debug, Clone)]
pub struct MemoryFs {
    uri: String,
    volume: String,
}

impl MemoryFs {
    pub fn new(uri: impl Into<String>, volume: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            volume: volume.into(),
        }
    }

    /// Connector registered for the `memory` scheme.
    pub fn connect(
        uri: &RootUri,
        _options: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn FileSystem>, ConfigError> {
        let volume = uri.authority().ok_or_else(|| ConfigError::InvalidUri {
            uri: uri.to_string(),
            reason: "memory uri must name a volume".to_string(),
        })?;
        debug!(root = %uri, volume, "memory filesystem adapter ready");
        Ok(Arc::new(Self::new(uri.as_str(), volume)))
    }

    fn volume(&self) -> Result<MemoryVolume, FsError> {
        match MemoryVolume::get(&self.volume) {
            Some(volume) if volume.is_reachable() => Ok(volume),
            Some(_) => Err(self.unreachable("volume is partitioned")),
            None => Err(self.unreachable("volume is not mounted")),
        }
    }

    fn unreachable(&self, reason: &str) -> FsError {
        FsError::Unreachable {
            uri: self.uri.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn exists(&self, path: &Path) -> Result<bool, FsError> {
        Ok(self.volume()?.contains(path))
    }

    async fn list(&self, path: &Path) -> Result<Vec<FsEntry>, FsError> {
        let volume = self.volume()?;
        let nodes = volume.read_nodes();
        match nodes.get(path) {
            Some(Node::Dir) => {}
            Some(Node::File { .. }) => {
                return Err(FsError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("not a directory"),
                });
            }
            None => return Err(FsError::NotFound(path.to_path_buf())),
        }
        Ok(nodes
            .range(path.to_path_buf()..)
            .skip(1)
            .take_while(|(key, _)| key.starts_with(path))
            .filter(|(key, _)| key.parent() == Some(path))
            .map(|(key, node)| node_entry(key, node))
            .collect())
    }

    async fn metadata(&self, path: &Path) -> Result<FsEntry, FsError> {
        self.volume()?
            .entry(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    async fn open(&self, path: &Path) -> Result<FileReader, FsError> {
        let volume = self.volume()?;
        let nodes = volume.read_nodes();
        match nodes.get(path) {
            Some(Node::File { data, .. }) => Ok(Box::pin(Cursor::new(data.as_ref().clone()))),
            Some(Node::Dir) => Err(FsError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("is a directory"),
            }),
            None => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    async fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
    ) -> Result<Option<ChangeSubscription>, FsError> {
        let volume = self.volume()?;
        if !volume.contains(path) {
            return Err(FsError::NotFound(path.to_path_buf()));
        }
        let mut rx = volume.inner.events.subscribe();
        let root = path.to_path_buf();

        let events = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let relevant = if recursive {
                            event.path.starts_with(&root) || root.starts_with(&event.path)
                        } else {
                            event.path.parent() == Some(root.as_path())
                                || root.starts_with(&event.path)
                        };
                        if relevant {
                            yield Ok(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(root = %root.display(), skipped, "memory watcher lagged");
                        yield Ok(ChangeEvent::new(ChangeKind::Overflow, root.clone()));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Some(ChangeSubscription::new(events.boxed())))
    }
}
