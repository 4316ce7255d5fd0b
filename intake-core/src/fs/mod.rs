//! Filesystem adapters.
//!
//! Every configured root is served by one [`FileSystem`] instance. Adapters
//! expose a small async surface (existence checks, single-level listings,
//! metadata, reads) plus optional change notifications; policies never touch
//! `std::fs` or `tokio::fs` directly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::io::AsyncRead;

use crate::error::FsError;

mod local;
pub mod memory;
pub mod registry;
mod uri;
mod walk;

pub use local::LocalFs;
pub use memory::{MemoryFs, MemoryVolume};
pub use registry::{AdapterConnector, AdapterRegistry};
pub use uri::{LOCAL_SCHEME, RootUri};
pub use walk::walk_files;

/// Byte stream handed to file readers.
pub type FileReader = Pin<Box<dyn AsyncRead + Send>>;

/// Async filesystem abstraction used by policies.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Check whether a path exists. Connectivity problems are errors, a
    /// missing path is `Ok(false)`.
    async fn exists(&self, path: &Path) -> Result<bool, FsError>;

    /// List the direct children of a directory.
    async fn list(&self, path: &Path) -> Result<Vec<FsEntry>, FsError>;

    /// Fetch lightweight metadata for a single path.
    async fn metadata(&self, path: &Path) -> Result<FsEntry, FsError>;

    /// Open a file for reading.
    async fn open(&self, path: &Path) -> Result<FileReader, FsError>;

    /// Subscribe to change notifications under `path`.
    ///
    /// Returns `Ok(None)` when the adapter has no native support; callers
    /// fall back to periodic re-listing.
    async fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
    ) -> Result<Option<ChangeSubscription>, FsError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// Lightweight metadata needed by policies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub len: u64,
    /// Last modified time if available
    pub modified: Option<SystemTime>,
}

impl FsEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    /// A writer closed the file.
    Closed,
    /// The path is the destination of a rename.
    Renamed,
    Removed,
    /// Events were dropped; the subscriber should rescan.
    Overflow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// A live change-notification feed. Dropping it stops the underlying watch.
pub struct ChangeSubscription {
    events: BoxStream<'static, Result<ChangeEvent, FsError>>,
    _guard: Option<Box<dyn Send>>,
}

impl ChangeSubscription {
    pub fn new(events: BoxStream<'static, Result<ChangeEvent, FsError>>) -> Self {
        Self {
            events,
            _guard: None,
        }
    }

    /// Keeps `guard` alive for as long as the subscription.
    pub fn with_guard(mut self, guard: impl Send + 'static) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// Next event, or `None` once the feed closed.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, FsError>> {
        self.events.next().await
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}
