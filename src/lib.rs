// src/lib.rs

//! CloudFlock Migration Engine
//!
//! Migrates a running Unix host onto a replacement host: profile the
//! source over one shell session, pick a destination shape from the
//! platform catalogs, rsync the filesystem into a mounted target root in
//! two passes while watchdogs supervise both endpoints, then rewrite the
//! boot-sensitive configuration in a chroot and remediate IP references.
//!
//! # Architecture
//!
//! - Sessions: framed command execution over a pluggable shell transport
//! - Profiles: ordered probe registry, deterministic for identical output
//! - Catalogs: image and flavor selection as plain data
//! - Engine: two-pass rsync with watchdog-driven cancellation and restart
//! - Orchestrator: one journaled state machine from connect to done

pub mod actions;
pub mod cleanup;
pub mod config;
mod error;
pub mod migrate;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod profile;
pub mod progress;
pub mod provision;
pub mod remediate;
pub mod shell;
pub mod watchdog;

pub use actions::{cleanup_for, exclusions_for, CleanupPlan, ExclusionList};
pub use config::{HostSpec, MigrationRequest};
pub use error::{Error, Result};
pub use migrate::{EngineSessions, MigrationEngine};
pub use orchestrator::{
    Journal, JournalRecord, MigrateState, MigrationOutcome, Orchestrator, Recommendation,
};
pub use platform::{Cpe, FlavorRecommendation, FlavorSpec, PlatformKey, CATALOG_V1, CATALOG_V2};
pub use profile::{HostProfiler, Profile};
pub use progress::{LogProgress, ProgressSink, SilentProgress};
pub use provision::{ProvisionRequest, ProvisionedHost, Provisioner};
pub use remediate::{pair_addresses, IpRemediator, IpRewrite};
pub use shell::{
    Escalation, HostEndpoint, LoginSecret, OpenSshTransport, Session, ShellStream, ShellTransport,
};
pub use watchdog::Watchdog;
