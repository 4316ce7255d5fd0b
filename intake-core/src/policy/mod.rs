//! Discovery policies.
//!
//! A [`Policy`] owns one [`FilesystemRoot`] per configured uri and turns them
//! into a stream of [`DiscoveredFile`]s. Listing policies ([`SimplePolicy`],
//! [`SleepyPolicy`], [`ScheduledPolicy`]) walk every root each time they are
//! executed; [`WatcherPolicy`] runs one background task per root and streams
//! change notifications as they arrive.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{FsError, PolicyError};
use crate::fs::{FileReader, FileSystem, FsEntry, RootUri};

mod lifecycle;
mod listing;
pub mod registry;
pub mod watcher;

pub use lifecycle::{Lifecycle, LifecycleState};
pub use listing::{
    Cadence, ListingPolicy, Scheduled, ScheduledPolicy, Simple, SimplePolicy, Sleepy,
    SleepyPolicy,
};
pub use registry::{PolicyConstructor, PolicyContext, PolicyRegistry};
pub use watcher::{RootState, WatcherPolicy, WatcherSettings};

/// Files produced by one `execute()` call.
pub type DiscoveryStream = BoxStream<'static, DiscoveredFile>;

/// Identifies the policy implementation behind a `dyn Policy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Simple,
    Sleepy,
    Scheduled,
    FsWatcher,
    /// A policy registered by the embedding application.
    Custom(&'static str),
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Simple => "simple",
            PolicyKind::Sleepy => "sleepy",
            PolicyKind::Scheduled => "scheduled",
            PolicyKind::FsWatcher => "fs_watcher",
            PolicyKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract between a discovery policy and the task driving it.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    fn kind(&self) -> PolicyKind;

    fn roots(&self) -> &[FilesystemRoot];

    /// Start (or continue) discovery.
    ///
    /// Fails with [`PolicyError::IllegalState`] once the policy has ended or
    /// was closed. Root failures are logged and never surface here.
    async fn execute(&self) -> Result<DiscoveryStream, PolicyError>;

    /// `true` once the policy stopped for good. Never blocks.
    fn has_ended(&self) -> bool;

    /// Request termination. Idempotent; `has_ended()` is `true` on return.
    fn interrupt(&self);

    /// Stop background work and release adapters. Idempotent.
    async fn close(&self);

    /// Number of `execute()` calls that produced a stream.
    fn executions(&self) -> u64;

    fn state(&self) -> LifecycleState;
}

/// One configured root bound to the adapter serving it.
#[derive(Clone)]
pub struct FilesystemRoot {
    uri: Arc<RootUri>,
    fs: Arc<dyn FileSystem>,
}

impl FilesystemRoot {
    pub fn new(uri: RootUri, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            uri: Arc::new(uri),
            fs,
        }
    }

    pub fn uri(&self) -> &Arc<RootUri> {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        self.uri.path()
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub(crate) fn discovered(&self, entry: FsEntry) -> DiscoveredFile {
        DiscoveredFile {
            root: Arc::clone(&self.uri),
            path: entry.path,
            len: entry.len,
            modified: entry.modified,
            fs: Arc::clone(&self.fs),
        }
    }
}

impl fmt::Debug for FilesystemRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemRoot")
            .field("uri", &self.uri.as_str())
            .field("fs", &self.fs)
            .finish()
    }
}

/// A candidate file handed to the reader.
#[derive(Clone)]
pub struct DiscoveredFile {
    root: Arc<RootUri>,
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
    fs: Arc<dyn FileSystem>,
}

impl DiscoveredFile {
    pub fn root(&self) -> &RootUri {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Open the file through the adapter it was discovered on.
    pub async fn open(&self) -> Result<FileReader, FsError> {
        self.fs.open(&self.path).await
    }
}

impl fmt::Debug for DiscoveredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredFile")
            .field("root", &self.root.as_str())
            .field("path", &self.path)
            .field("len", &self.len)
            .field("modified", &self.modified)
            .finish()
    }
}
