//! Change-notification policy.
//!
//! Each root gets its own tokio task that subscribes to the adapter's change
//! feed (or polls it when the adapter has none), debounces bursts of events
//! per path and pushes settled candidates onto a channel shared by all roots.
//! [`Policy::execute`] hands out a stream over that channel.
//!
//! Tasks start when the policy is built, so building requires a running tokio
//! runtime.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DiscoveredFile, DiscoveryStream, FilesystemRoot, Lifecycle, LifecycleState, Policy,
    PolicyContext, PolicyKind,
};
use crate::config::SourceConfig;
use crate::error::{ConfigError, PolicyError};

mod backoff;
mod root;
mod snapshot;

pub use backoff::Backoff;
pub use root::RootState;
pub use snapshot::Snapshot;

use root::{RootStatus, RootWorker};

pub const POLL_MS: &str = "policy.fs_watcher.poll_ms";
pub const RETRY_MS: &str = "policy.fs_watcher.retry_ms";
pub const MAX_RETRIES: &str = "policy.fs_watcher.max_retries";
pub const RETRY_MAX_MS: &str = "policy.fs_watcher.retry_max_ms";
pub const DEBOUNCE_MS: &str = "policy.fs_watcher.debounce_ms";
pub const TEMP_SUFFIXES: &str = "policy.fs_watcher.temp_suffixes";

// Floor for idle waits so a zero poll interval does not spin.
const MIN_IDLE_WAIT: Duration = Duration::from_millis(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the watcher policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatcherSettings {
    /// Upper bound of every wait; also how quickly interruption is noticed.
    pub poll_interval: Duration,
    /// First reconnection delay, doubled per consecutive failure.
    pub retry_interval: Duration,
    pub retry_max: Duration,
    /// Consecutive failures tolerated before a root is abandoned.
    pub max_retries: u32,
    /// Quiet period after the last event for a path before it is reported.
    pub debounce: Duration,
    /// Files ending with one of these are still being written.
    pub temp_suffixes: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            retry_interval: Duration::from_millis(5000),
            retry_max: Duration::from_millis(60_000),
            max_retries: 5,
            debounce: Duration::from_millis(250),
            temp_suffixes: Vec::new(),
        }
    }
}

impl WatcherSettings {
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tunables = config.tunables();

        let max_retries = tunables.u64_or(MAX_RETRIES, u64::from(defaults.max_retries))?;
        let max_retries = u32::try_from(max_retries)
            .map_err(|_| ConfigError::invalid(MAX_RETRIES, max_retries.to_string(), "too large"))?;

        let temp_suffixes = tunables
            .raw(TEMP_SUFFIXES)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|suffix| !suffix.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.temp_suffixes);

        Ok(Self {
            poll_interval: tunables.millis_or(POLL_MS, defaults.poll_interval)?,
            retry_interval: tunables.millis_or(RETRY_MS, defaults.retry_interval)?,
            retry_max: tunables.millis_or(RETRY_MAX_MS, defaults.retry_max)?,
            max_retries,
            debounce: tunables.millis_or(DEBOUNCE_MS, defaults.debounce)?,
            temp_suffixes,
        })
    }

    pub(crate) fn idle_wait(&self) -> Duration {
        self.poll_interval.max(MIN_IDLE_WAIT)
    }

    pub(crate) fn is_temporary(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| {
                self.temp_suffixes
                    .iter()
                    .any(|suffix| name.ends_with(suffix.as_str()))
            })
    }
}

/// Watches every root in the background and streams new or changed files.
///
/// The policy never ends by itself unless every root failed; callers stop it
/// with [`Policy::interrupt`].
pub struct WatcherPolicy {
    roots: Vec<FilesystemRoot>,
    settings: Arc<WatcherSettings>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DiscoveredFile>>>,
    statuses: Vec<Arc<RootStatus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    executions: AtomicU64,
}

impl fmt::Debug for WatcherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .tasks
            .try_lock()
            .map(|tasks| tasks.len())
            .unwrap_or_default();
        f.debug_struct("WatcherPolicy")
            .field("roots", &self.roots)
            .field("settings", &self.settings)
            .field("state", &self.lifecycle.state())
            .field("root_states", &self.root_states())
            .field("task_count", &task_count)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl WatcherPolicy {
    pub fn new(context: PolicyContext) -> Result<Self, ConfigError> {
        let settings = WatcherSettings::from_config(&context.config)?;
        Self::with_settings(context, settings)
    }

    /// Validates nothing further; spawns one task per root on the current
    /// runtime.
    pub fn with_settings(
        context: PolicyContext,
        settings: WatcherSettings,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current()
            .map_err(|_| ConfigError::MissingRuntime(PolicyKind::FsWatcher.to_string()))?;

        let PolicyContext {
            config,
            roots,
            rule,
        } = context;
        let settings = Arc::new(settings);
        let lifecycle = Arc::new(Lifecycle::running());
        let cancel = CancellationToken::new();
        let live_roots = Arc::new(AtomicUsize::new(roots.len()));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut statuses = Vec::with_capacity(roots.len());
        let mut tasks = Vec::with_capacity(roots.len());
        for root in &roots {
            let status = Arc::new(RootStatus::new());
            let worker = RootWorker {
                root: root.clone(),
                rule: Arc::clone(&rule),
                recursive: config.recursive(),
                settings: Arc::clone(&settings),
                tx: tx.clone(),
                cancel: cancel.clone(),
                status: Arc::clone(&status),
                lifecycle: Arc::clone(&lifecycle),
                live_roots: Arc::clone(&live_roots),
            };
            debug!(root = %root.uri(), "spawning root watcher");
            tasks.push(runtime.spawn(worker.run()));
            statuses.push(status);
        }

        info!(
            roots = roots.len(),
            poll_ms = settings.poll_interval.as_millis() as u64,
            retry_ms = settings.retry_interval.as_millis() as u64,
            max_retries = settings.max_retries,
            "watcher policy started"
        );

        Ok(Self {
            roots,
            settings,
            lifecycle,
            cancel,
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            statuses,
            tasks: Mutex::new(tasks),
            executions: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    /// Current state of every root, in configured order.
    pub fn root_states(&self) -> Vec<(String, RootState)> {
        self.roots
            .iter()
            .zip(&self.statuses)
            .map(|(root, status)| (root.uri().to_string(), status.get()))
            .collect()
    }
}

#[async_trait]
impl Policy for WatcherPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::FsWatcher
    }

    fn roots(&self) -> &[FilesystemRoot] {
        &self.roots
    }

    async fn execute(&self) -> Result<DiscoveryStream, PolicyError> {
        self.lifecycle.ensure_active()?;
        let execution = self.executions.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(policy = %PolicyKind::FsWatcher, execution, "streaming watcher discoveries");

        let receiver = Arc::clone(&self.receiver);
        let cancel = self.cancel.clone();
        let stream = async_stream::stream! {
            let mut rx = tokio::select! {
                biased;
                guard = receiver.lock_owned() => guard,
                _ = cancel.cancelled() => return,
            };
            loop {
                let next = tokio::select! {
                    biased;
                    file = rx.recv() => file,
                    _ = cancel.cancelled() => None,
                };
                match next {
                    Some(file) => yield file,
                    None => break,
                }
            }
            // Files queued before the interruption are still delivered.
            while let Ok(file) = rx.try_recv() {
                yield file;
            }
        };
        Ok(stream.boxed())
    }

    fn has_ended(&self) -> bool {
        self.lifecycle.has_ended()
    }

    fn interrupt(&self) {
        if self.lifecycle.end() {
            info!(policy = %PolicyKind::FsWatcher, "policy interrupted");
        }
        self.cancel.cancel();
    }

    async fn close(&self) {
        self.cancel.cancel();
        let first = self.lifecycle.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for mut task in tasks {
            match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "root watcher task failed"),
                Err(_) => {
                    warn!("root watcher task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        if first {
            info!(policy = %PolicyKind::FsWatcher, "policy closed");
        }
    }

    fn executions(&self) -> u64 {
        self.executions.load(Ordering::Acquire)
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

impl Drop for WatcherPolicy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
