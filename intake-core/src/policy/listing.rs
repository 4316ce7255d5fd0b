//! Policies that discover files by walking every root on each execution.
//!
//! The three listing policies share one implementation, [`ListingPolicy`],
//! and differ only in their [`Cadence`]: when an execution may start and when
//! the policy is exhausted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DiscoveryStream, FilesystemRoot, Lifecycle, LifecycleState, Policy, PolicyContext, PolicyKind,
};
use crate::config::SourceConfig;
use crate::error::{ConfigError, PolicyError};
use crate::fs::walk_files;
use crate::selection::SelectionRule;

pub const SLEEPY_SLEEP: &str = "policy.sleepy.sleep";
pub const SLEEPY_MAX_EXECS: &str = "policy.sleepy.max_execs";
pub const SCHEDULED_INTERVAL_MS: &str = "policy.scheduled.interval_ms";
pub const SCHEDULED_END_DATE: &str = "policy.scheduled.end_date";

/// Pacing of a listing policy.
#[async_trait]
pub trait Cadence: Send + Sync + fmt::Debug + Sized + 'static {
    const KIND: PolicyKind;

    fn from_config(config: &SourceConfig) -> Result<Self, ConfigError>;

    /// Wait until the next execution may start. `previous` is the start of
    /// the last execution. Returns `false` when cancelled while waiting.
    async fn wait(&self, previous: Option<Instant>, cancel: &CancellationToken) -> bool;

    /// `true` once no further execution may run after `executions` of them.
    fn exhausted(&self, executions: u64) -> bool;
}

/// Lists every root once.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simple;

#[async_trait]
impl Cadence for Simple {
    const KIND: PolicyKind = PolicyKind::Simple;

    fn from_config(_config: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(Simple)
    }

    async fn wait(&self, _previous: Option<Instant>, _cancel: &CancellationToken) -> bool {
        true
    }

    fn exhausted(&self, executions: u64) -> bool {
        executions >= 1
    }
}

/// Sleeps between executions, optionally bounded by an execution count.
#[derive(Debug, Clone, Copy)]
pub struct Sleepy {
    sleep: Duration,
    /// Negative means unbounded.
    max_execs: i64,
}

impl Sleepy {
    pub fn new(sleep: Duration, max_execs: i64) -> Self {
        Self { sleep, max_execs }
    }
}

#[async_trait]
impl Cadence for Sleepy {
    const KIND: PolicyKind = PolicyKind::Sleepy;

    fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let tunables = config.tunables();
        let sleep = Duration::from_millis(tunables.required_u64(SLEEPY_SLEEP)?);
        let max_execs = tunables.i64_or(SLEEPY_MAX_EXECS, -1)?;
        Ok(Self::new(sleep, max_execs))
    }

    async fn wait(&self, previous: Option<Instant>, cancel: &CancellationToken) -> bool {
        if previous.is_none() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.sleep) => true,
        }
    }

    fn exhausted(&self, executions: u64) -> bool {
        u64::try_from(self.max_execs).is_ok_and(|max| executions >= max)
    }
}

/// Starts executions on a fixed interval until an optional end date.
#[derive(Debug, Clone, Copy)]
pub struct Scheduled {
    interval: Duration,
    end_date: Option<DateTime<Utc>>,
}

impl Scheduled {
    pub fn new(interval: Duration, end_date: Option<DateTime<Utc>>) -> Self {
        Self { interval, end_date }
    }
}

#[async_trait]
impl Cadence for Scheduled {
    const KIND: PolicyKind = PolicyKind::Scheduled;

    fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let tunables = config.tunables();
        let interval = Duration::from_millis(tunables.required_u64(SCHEDULED_INTERVAL_MS)?);
        let end_date = tunables.optional_datetime(SCHEDULED_END_DATE)?;
        if let Some(end) = end_date
            && end <= Utc::now()
        {
            warn!(end_date = %end, "scheduled policy end date already passed");
        }
        Ok(Self::new(interval, end_date))
    }

    async fn wait(&self, previous: Option<Instant>, cancel: &CancellationToken) -> bool {
        let Some(previous) = previous else {
            return !cancel.is_cancelled();
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(previous + self.interval) => true,
        }
    }

    fn exhausted(&self, _executions: u64) -> bool {
        self.end_date.is_some_and(|end| Utc::now() >= end)
    }
}

pub type SimplePolicy = ListingPolicy<Simple>;
pub type SleepyPolicy = ListingPolicy<Sleepy>;
pub type ScheduledPolicy = ListingPolicy<Scheduled>;

/// Walks every root on each execution and streams the files passing the
/// selection rule. Roots that fail or do not exist are logged and skipped.
pub struct ListingPolicy<C: Cadence> {
    roots: Vec<FilesystemRoot>,
    rule: Arc<SelectionRule>,
    recursive: bool,
    cadence: C,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    executions: AtomicU64,
    last_start: Mutex<Option<Instant>>,
}

impl<C: Cadence> fmt::Debug for ListingPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingPolicy")
            .field("kind", &C::KIND)
            .field("roots", &self.roots)
            .field("pattern", &self.rule.pattern())
            .field("recursive", &self.recursive)
            .field("cadence", &self.cadence)
            .field("state", &self.lifecycle.state())
            .field("executions", &self.executions())
            .finish()
    }
}

impl<C: Cadence> ListingPolicy<C> {
    pub fn new(context: PolicyContext) -> Result<Self, ConfigError> {
        let cadence = C::from_config(&context.config)?;
        Ok(Self::with_cadence(context, cadence))
    }

    pub fn with_cadence(context: PolicyContext, cadence: C) -> Self {
        Self {
            recursive: context.config.recursive(),
            roots: context.roots,
            rule: context.rule,
            cadence,
            lifecycle: Lifecycle::new(),
            cancel: CancellationToken::new(),
            executions: AtomicU64::new(0),
            last_start: Mutex::new(None),
        }
    }

    pub fn cadence(&self) -> &C {
        &self.cadence
    }

    fn last_start(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_start.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // An end date can pass between executions; the lifecycle follows it.
    fn end_if_exhausted(&self) {
        if self.cadence.exhausted(self.executions()) && self.lifecycle.end() {
            info!(policy = %C::KIND, executions = self.executions(), "policy exhausted");
        }
    }
}

#[async_trait]
impl<C: Cadence> Policy for ListingPolicy<C> {
    fn kind(&self) -> PolicyKind {
        C::KIND
    }

    fn roots(&self) -> &[FilesystemRoot] {
        &self.roots
    }

    async fn execute(&self) -> Result<DiscoveryStream, PolicyError> {
        self.end_if_exhausted();
        self.lifecycle.ensure_active()?;

        let previous = *self.last_start();
        if !self.cadence.wait(previous, &self.cancel).await {
            return Err(self.lifecycle.illegal_state());
        }
        self.lifecycle.start()?;
        *self.last_start() = Some(Instant::now());

        let execution = self.executions.fetch_add(1, Ordering::AcqRel) + 1;
        info!(policy = %C::KIND, execution, roots = self.roots.len(), "listing roots");
        if self.cadence.exhausted(execution) && self.lifecycle.end() {
            info!(policy = %C::KIND, execution, "policy finished its last execution");
        }

        Ok(list_roots(
            self.roots.clone(),
            Arc::clone(&self.rule),
            self.recursive,
            self.cancel.clone(),
        ))
    }

    fn has_ended(&self) -> bool {
        self.end_if_exhausted();
        self.lifecycle.has_ended()
    }

    fn interrupt(&self) {
        if self.lifecycle.end() {
            info!(policy = %C::KIND, "policy interrupted");
        }
        self.cancel.cancel();
    }

    async fn close(&self) {
        self.cancel.cancel();
        if self.lifecycle.close() {
            info!(policy = %C::KIND, "policy closed");
        }
    }

    fn executions(&self) -> u64 {
        self.executions.load(Ordering::Acquire)
    }

    fn state(&self) -> LifecycleState {
        self.end_if_exhausted();
        self.lifecycle.state()
    }
}

impl<C: Cadence> Drop for ListingPolicy<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn list_roots(
    roots: Vec<FilesystemRoot>,
    rule: Arc<SelectionRule>,
    recursive: bool,
    cancel: CancellationToken,
) -> DiscoveryStream {
    async_stream::stream! {
        for root in roots {
            if cancel.is_cancelled() {
                debug!("listing cancelled");
                break;
            }
            match walk_files(root.fs().as_ref(), root.path(), recursive).await {
                Ok(entries) => {
                    for entry in entries.into_iter().filter(|entry| rule.accepts(entry)) {
                        debug!(root = %root.uri(), path = %entry.path.display(), "discovered file");
                        yield root.discovered(entry);
                    }
                }
                Err(err) if err.is_not_found() => {
                    warn!(root = %root.uri(), "root does not exist, nothing to list");
                }
                Err(err) => {
                    warn!(root = %root.uri(), error = %err, "failed to list root");
                }
            }
        }
    }
    .boxed()
}
