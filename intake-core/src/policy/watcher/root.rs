//! Background task driving one watched root.
//!
//! ```text
//! Connecting --exists--> Watching --root removed--> Dormant --reappears--> Connecting
//!     |                     |
//!     +--error--> backoff --+--retries exhausted--> Failed
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::WatcherSettings;
use super::backoff::Backoff;
use super::snapshot::Snapshot;
use crate::error::FsError;
use crate::fs::{ChangeEvent, ChangeKind, ChangeSubscription, FsEntry, walk_files};
use crate::policy::{DiscoveredFile, FilesystemRoot, Lifecycle};
use crate::selection::{SelectionRule, Verdict};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RootState {
    Connecting = 0,
    Watching = 1,
    /// The root path does not exist; polled until it reappears.
    Dormant = 2,
    /// Retries exhausted. Terminal.
    Failed = 3,
}

impl RootState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RootState::Connecting,
            1 => RootState::Watching,
            2 => RootState::Dormant,
            _ => RootState::Failed,
        }
    }
}

#[derive(Debug)]
pub(super) struct RootStatus(AtomicU8);

impl RootStatus {
    pub(super) fn new() -> Self {
        Self(AtomicU8::new(RootState::Connecting as u8))
    }

    pub(super) fn get(&self) -> RootState {
        RootState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RootState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

enum Source {
    Native(ChangeSubscription),
    Polling(Snapshot),
}

enum Exit {
    Cancelled,
    RootMissing,
}

enum Report {
    Sent,
    Skipped,
    /// Matches but is younger than the minimum age; retry after the wait.
    Deferred(Duration),
    /// Nobody receives discoveries anymore.
    Closed,
}

// Paths waiting for their debounce window or minimum age to pass.
type Pending = BTreeMap<PathBuf, Instant>;

pub(super) struct RootWorker {
    pub(super) root: FilesystemRoot,
    pub(super) rule: Arc<SelectionRule>,
    pub(super) recursive: bool,
    pub(super) settings: Arc<WatcherSettings>,
    pub(super) tx: mpsc::UnboundedSender<DiscoveredFile>,
    pub(super) cancel: CancellationToken,
    pub(super) status: Arc<RootStatus>,
    pub(super) lifecycle: Arc<Lifecycle>,
    pub(super) live_roots: Arc<AtomicUsize>,
}

impl RootWorker {
    pub(super) async fn run(self) {
        let mut backoff = Backoff::new(
            self.settings.retry_interval,
            self.settings.retry_max,
            self.settings.max_retries,
        );
        let mut catch_up = false;

        while !self.cancel.is_cancelled() {
            match self.session(&mut backoff, &mut catch_up).await {
                Ok(Exit::Cancelled) => break,
                Ok(Exit::RootMissing) => {
                    info!(root = %self.root.uri(), "root was removed");
                    catch_up = true;
                }
                Err(err) if err.is_not_found() => {
                    info!(root = %self.root.uri(), error = %err, "root vanished while watching");
                    catch_up = true;
                    if !self.pause(self.settings.idle_wait()).await {
                        break;
                    }
                }
                Err(err) if !err.is_connectivity() => {
                    self.give_up(&err, backoff.attempts());
                    return;
                }
                Err(err) => {
                    // Changes made while disconnected have no events.
                    catch_up |= self.status.get() == RootState::Watching;
                    let Some(delay) = backoff.next_delay() else {
                        self.give_up(&err, backoff.attempts());
                        return;
                    };
                    warn!(
                        root = %self.root.uri(),
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "root watcher failed, retrying"
                    );
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }
        debug!(root = %self.root.uri(), "root watcher stopped");
    }

    async fn session(&self, backoff: &mut Backoff, catch_up: &mut bool) -> Result<Exit, FsError> {
        self.status.set(RootState::Connecting);
        let path = self.root.path();

        if !self.root.fs().exists(path).await? {
            self.status.set(RootState::Dormant);
            backoff.reset();
            info!(root = %self.root.uri(), "root does not exist, waiting for it to appear");
            if !self.await_root().await? {
                return Ok(Exit::Cancelled);
            }
            info!(root = %self.root.uri(), "root appeared");
            *catch_up = true;
        }

        let source = match self.open_source().await {
            Ok(source) => source,
            Err(err) if err.is_not_found() => return Ok(Exit::RootMissing),
            Err(err) => return Err(err),
        };
        backoff.reset();
        self.status.set(RootState::Watching);

        // Files written while the root was gone or being re-created.
        let mut pending = Pending::new();
        if std::mem::take(catch_up) && !self.report_tree(self.root.path(), &mut pending).await? {
            return Ok(Exit::Cancelled);
        }

        match source {
            Source::Native(subscription) => {
                info!(root = %self.root.uri(), "watching root for changes");
                self.watch_native(subscription, pending).await
            }
            Source::Polling(mut snapshot) => {
                for path in pending.keys() {
                    snapshot.forget(path);
                }
                info!(
                    root = %self.root.uri(),
                    poll_ms = self.settings.poll_interval.as_millis() as u64,
                    "no change notifications for root, polling"
                );
                self.watch_polling(snapshot).await
            }
        }
    }

    async fn open_source(&self) -> Result<Source, FsError> {
        let path = self.root.path();
        match self.root.fs().subscribe(path, self.recursive).await {
            Ok(Some(subscription)) => Ok(Source::Native(subscription)),
            Ok(None) | Err(FsError::Unsupported(_)) => {
                let entries = walk_files(self.root.fs().as_ref(), path, self.recursive).await?;
                Ok(Source::Polling(Snapshot::new(entries)))
            }
            Err(err) => Err(err),
        }
    }

    // Returns `Ok(false)` when cancelled first.
    async fn await_root(&self) -> Result<bool, FsError> {
        loop {
            if !self.pause(self.settings.idle_wait()).await {
                return Ok(false);
            }
            if self.root.fs().exists(self.root.path()).await? {
                return Ok(true);
            }
        }
    }

    async fn watch_native(
        &self,
        mut subscription: ChangeSubscription,
        mut pending: Pending,
    ) -> Result<Exit, FsError> {
        loop {
            let now = Instant::now();
            let wait = pending
                .values()
                .min()
                .map(|due| due.saturating_duration_since(now))
                .unwrap_or(Duration::MAX)
                .min(self.settings.idle_wait());

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Exit::Cancelled),
                received = tokio::time::timeout(wait, subscription.next()) => received,
            };

            match received {
                Ok(Some(Ok(change))) => {
                    if let Some(exit) = self.on_change(change, &mut pending).await? {
                        return Ok(exit);
                    }
                }
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => {
                    return Err(FsError::Watch {
                        path: self.root.path().to_path_buf(),
                        reason: "change feed closed".to_string(),
                    });
                }
                Err(_) if pending.is_empty() => {
                    if !self.root.fs().exists(self.root.path()).await? {
                        return Ok(Exit::RootMissing);
                    }
                }
                Err(_) => {}
            }

            if !self.flush_due(&mut pending).await? {
                return Ok(Exit::Cancelled);
            }
        }
    }

    async fn on_change(
        &self,
        change: ChangeEvent,
        pending: &mut Pending,
    ) -> Result<Option<Exit>, FsError> {
        let root = self.root.path();
        match change.kind {
            ChangeKind::Removed if root.starts_with(&change.path) => Ok(Some(Exit::RootMissing)),
            ChangeKind::Removed => {
                pending.retain(|path, _| !path.starts_with(&change.path));
                Ok(None)
            }
            ChangeKind::Overflow => {
                warn!(root = %self.root.uri(), "change notifications overflowed, rescanning root");
                pending.clear();
                if self.report_tree(root, pending).await? {
                    Ok(None)
                } else {
                    Ok(Some(Exit::Cancelled))
                }
            }
            ChangeKind::Created | ChangeKind::Modified | ChangeKind::Closed | ChangeKind::Renamed => {
                let in_scope = if self.recursive {
                    change.path.starts_with(root) && change.path != root
                } else {
                    change.path.parent() == Some(root)
                };
                if in_scope && !self.settings.is_temporary(&change.path) {
                    pending.insert(change.path, Instant::now() + self.settings.debounce);
                }
                Ok(None)
            }
        }
    }

    // Returns `Ok(false)` once nobody listens anymore.
    async fn flush_due(&self, pending: &mut Pending) -> Result<bool, FsError> {
        let now = Instant::now();
        let due: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in due {
            if pending.remove(&path).is_none() {
                continue;
            }
            let entry = match self.root.fs().metadata(&path).await {
                Ok(entry) => entry,
                Err(err) if err.is_not_found() => {
                    debug!(path = %path.display(), "changed path vanished before it settled");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if entry.is_dir() {
                if !self.recursive {
                    continue;
                }
                // The tree listing covers anything still pending below it.
                pending.retain(|pending_path, _| !pending_path.starts_with(&path));
                if !self.report_tree(&path, pending).await? {
                    return Ok(false);
                }
            } else if !self.report_or_defer(entry, pending) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn watch_polling(&self, mut snapshot: Snapshot) -> Result<Exit, FsError> {
        loop {
            if !self.pause(self.settings.idle_wait()).await {
                return Ok(Exit::Cancelled);
            }
            let entries = match walk_files(self.root.fs().as_ref(), self.root.path(), self.recursive)
                .await
            {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() => return Ok(Exit::RootMissing),
                Err(err) => return Err(err),
            };
            for entry in snapshot.refresh(entries) {
                let path = entry.path.clone();
                match self.report(entry) {
                    Report::Sent | Report::Skipped => {}
                    // Seen again, and re-checked, on the next listing.
                    Report::Deferred(_) => snapshot.forget(&path),
                    Report::Closed => return Ok(Exit::Cancelled),
                }
            }
        }
    }

    // Returns `Ok(false)` once nobody listens anymore.
    async fn report_tree(&self, dir: &Path, pending: &mut Pending) -> Result<bool, FsError> {
        let entries = match walk_files(self.root.fs().as_ref(), dir, self.recursive).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Ok(true),
            Err(err) => return Err(err),
        };
        Ok(entries
            .into_iter()
            .all(|entry| self.report_or_defer(entry, pending)))
    }

    // Young files go back into `pending` until they are old enough.
    fn report_or_defer(&self, entry: FsEntry, pending: &mut Pending) -> bool {
        let path = entry.path.clone();
        match self.report(entry) {
            Report::Sent | Report::Skipped => true,
            Report::Deferred(wait) => {
                debug!(
                    path = %path.display(),
                    wait_ms = wait.as_millis() as u64,
                    "file too young, deferring"
                );
                pending.insert(path, Instant::now() + wait);
                true
            }
            Report::Closed => false,
        }
    }

    fn report(&self, entry: FsEntry) -> Report {
        if self.settings.is_temporary(&entry.path) {
            return Report::Skipped;
        }
        match self.rule.verdict(&entry) {
            Verdict::Reject => Report::Skipped,
            Verdict::TooYoung(wait) => Report::Deferred(wait),
            Verdict::Accept => {
                debug!(root = %self.root.uri(), path = %entry.path.display(), "discovered file");
                if self.tx.send(self.root.discovered(entry)).is_ok() {
                    Report::Sent
                } else {
                    Report::Closed
                }
            }
        }
    }

    // Returns `false` when cancelled before `delay` elapsed.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn give_up(&self, err: &FsError, attempts: u32) {
        self.status.set(RootState::Failed);
        error!(root = %self.root.uri(), attempts, error = %err, "giving up on root");
        if self.live_roots.fetch_sub(1, Ordering::AcqRel) == 1 && self.lifecycle.end() {
            warn!("every root failed, watcher policy ended");
        }
    }
}
