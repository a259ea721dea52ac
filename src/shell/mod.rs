// src/shell/mod.rs

//! Remote shell sessions
//!
//! One `Session` per host, layered over a pluggable `ShellTransport`.
//! Commands are framed with per-call tags and terminated by the prompt
//! sentinel, so output extraction never guesses.

mod endpoint;
mod session;
mod transport;

pub use endpoint::{Escalation, HostEndpoint, LoginSecret};
pub use session::{ConnState, OutputTap, Session, SessionStats, PROMPT_SENTINEL};
pub use transport::{ssh_option_args, OpenSshTransport, ShellStream, ShellTransport, SSH_OPTIONS};

use std::time::Duration;

/// Deadline for profiling probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for package-manager installs
pub const PACKAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Deadline for keypair generation and managed-cloud polling
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3600);

/// Deadline for one rsync pass
pub const RSYNC_TIMEOUT: Duration = Duration::from_secs(7200);

/// No deadline; used for chroot-bound cleanup phases
pub const UNLIMITED: Duration = Duration::ZERO;
