//! LiveMark core - live-update propagation for a directory of documents.
//!
//! This crate discovers which documents may be viewed, keeps that set
//! current as the filesystem changes, and fans change notifications out to
//! any number of connected viewers with replay across reconnects.
//!
//! # Overview
//!
//! On startup or navigation the [`walker`] produces the [`whitelist`] under
//! the rules of [`boundary`] and [`ignore`]. The [`watcher`] is then armed on
//! the root; its events update the whitelist incrementally, consult the
//! [`session`] correlator for who made the change, and publish a
//! [`types::ChangeNotification`] on the [`broadcast`] bus.
//!
//! # Security
//!
//! Every path that is listed, watched or served resolves (symlinks included)
//! under a single boundary root. [`boundary::PathBoundary`] is the only place
//! that decision is made.
//!
//! # Modules
//!
//! - [`boundary`]: path containment and symlink resolution
//! - [`ignore`]: built-in and per-root directory exclusions
//! - [`walker`]: cycle-safe scan producing the whitelist
//! - [`whitelist`]: the lock-guarded set of eligible documents
//! - [`watcher`]: race-free file and directory watches
//! - [`broadcast`]: bounded, replayable fan-out
//! - [`session`]: side-channel correlation of actors to files
//! - [`persistence`]: durable JSON-lines session log
//! - [`index`]: navigation and file opening over the above
//! - [`services`]: wiring from [`config`]
//! - [`types`]: notification wire format
//! - [`error`]: error types

pub mod boundary;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod ignore;
pub mod index;
pub mod persistence;
pub mod services;
pub mod session;
pub mod types;
pub mod walker;
pub mod watcher;
pub mod whitelist;

pub use boundary::{BoundaryError, PathBoundary};
pub use broadcast::{EventBus, EventRecord, Subscription};
pub use config::{Config, ConfigError};
pub use error::{CoreError, Result};
pub use ignore::{IgnorePatterns, IgnoreRules};
pub use index::LiveIndex;
pub use persistence::{SessionLog, SessionLogError};
pub use services::LiveMark;
pub use session::{SessionCorrelator, SessionRecord};
pub use types::{ChangeKind, ChangeNotification};
pub use walker::{DocumentFilter, FileIndexWalker, ScanResult, VisitedDirs};
pub use watcher::{WatchConfig, WatchError, WatchRole, WatchSupervisor};
pub use whitelist::{Whitelist, WhitelistSnapshot};
