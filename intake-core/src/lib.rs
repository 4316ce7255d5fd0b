//! # Intake Core
//!
//! Discovery engine for fs-intake: finds new or changed files under one or
//! more filesystem roots and hands them to a record reader.
//!
//! ## Overview
//!
//! - **Filesystem adapters**: [`fs::FileSystem`] over local disks (`file://`
//!   and bare paths) and named in-process volumes (`memory://`)
//! - **Selection**: basename regex plus optional size and age filters
//! - **Policies**: one-shot, sleepy and scheduled listing, and a
//!   change-notification watcher with per-root reconnection backoff
//! - **Registry**: builds the policy named by `policy.class`, validating every
//!   option before discovery starts
//!
//! ## Feature Flags
//!
//! - `native-watch` (default): `notify`-based change notifications for local
//!   roots. Without it local roots are watched by polling.
//!
//! ## Examples
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use futures::StreamExt;
//! use intake_core::{PolicyRegistry, SourceConfig};
//!
//! # async fn discover() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SourceConfig::from_map(BTreeMap::from([
//!     ("fs.uris".to_string(), "/data/in".to_string()),
//!     ("topic".to_string(), "ingest".to_string()),
//!     ("policy.class".to_string(), "simple".to_string()),
//!     ("file_reader.class".to_string(), "text".to_string()),
//!     ("policy.regexp".to_string(), r"^[0-9]+\.txt$".to_string()),
//! ]))?;
//!
//! let policy = PolicyRegistry::default().build(&config)?;
//! while !policy.has_ended() {
//!     let mut files = policy.execute().await?;
//!     while let Some(file) = files.next().await {
//!         println!("{}", file.path().display());
//!     }
//! }
//! policy.close().await;
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod fs;
pub mod policy;
pub mod selection;

pub use config::{SourceConfig, Tunables};
pub use error::{ConfigError, FsError, PolicyError, Result};
pub use fs::{AdapterRegistry, FileSystem, MemoryVolume, RootUri};
pub use policy::{
    DiscoveredFile, DiscoveryStream, FilesystemRoot, LifecycleState, Policy, PolicyContext,
    PolicyKind, PolicyRegistry, RootState, WatcherPolicy, WatcherSettings,
};
pub use selection::{SelectionRule, Verdict};
