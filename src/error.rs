// src/error.rs

//! Crate-wide error type
//!
//! Every component raises the same error enumeration; each variant carries
//! enough context (host, phase, command tag) to be actionable from the
//! orchestrator without chasing module-local error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the migration engine and its components
#[derive(Debug, Error)]
pub enum Error {
    /// Hostname lookup failed before a connection was attempted
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    /// Authentication exhausted its retry budget
    #[error("Login to {host} failed after {attempts} attempts: {reason}")]
    LoginFailed {
        host: String,
        attempts: u32,
        reason: String,
    },

    /// A command ran past its deadline and was not marked recoverable
    #[error("Deadline of {timeout_secs}s exceeded on {host} (phase: {phase}, tag: {tag})")]
    DeadlineExceeded {
        host: String,
        phase: String,
        tag: String,
        timeout_secs: u64,
    },

    /// The transport dropped twice for the same command
    #[error("Session to {host} lost: {reason}")]
    SessionLost { host: String, reason: String },

    /// Privilege escalation completed but `id` still reports uid != 0
    #[error("Escalation on {host} did not reach uid 0: {detail}")]
    NotSuperuser { host: String, detail: String },

    /// The platform could not be resolved to a known vendor
    #[error("Unable to determine platform: {0}")]
    PlatformNotResolved(String),

    /// No flavor in the catalog satisfies the demand
    #[error("No flavor satisfies {memory_mib} MiB memory and {disk_gb} GB disk")]
    NoFlavor { memory_mib: u64, disk_gb: u64 },

    /// No image is mapped for the platform
    #[error("No image mapped for platform {vendor} {version}")]
    NoImage { vendor: String, version: String },

    /// rsync could not be installed on either endpoint
    #[error("rsync unavailable on {host} and could not be vended: {detail}")]
    NoRsync { host: String, detail: String },

    /// An rsync pass failed after its retry budget
    #[error("rsync pass {pass} failed after {attempts} attempts: {tail}")]
    RsyncFailed {
        pass: u32,
        attempts: u32,
        tail: String,
    },

    /// The migrate worker was cancelled by a watchdog alarm
    #[error("Migration cancelled by watchdog alarm: {alarms:?}")]
    Cancelled { alarms: Vec<String> },

    /// A cleanup phase script exited nonzero (best-effort, usually logged)
    #[error("Cleanup phase {phase} failed: {detail}")]
    CleanupFailed { phase: String, detail: String },

    /// Journal file could not be written or replayed
    #[error("Journal error at {path}: {detail}")]
    Journal { path: PathBuf, detail: String },

    /// Remote output did not parse the way a probe expected
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration was structurally invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local filesystem or subprocess failure
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl Error {
    /// True when the orchestrator may retry the current phase
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::SessionLost { .. }
                | Error::Cancelled { .. }
                | Error::DeadlineExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let e = Error::DeadlineExceeded {
            host: "src.example.com".to_string(),
            phase: "migrate".to_string(),
            tag: "q4f9".to_string(),
            timeout_secs: 7200,
        };
        let msg = e.to_string();
        assert!(msg.contains("src.example.com"));
        assert!(msg.contains("migrate"));
        assert!(msg.contains("7200"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Cancelled { alarms: vec![] }.is_recoverable());
        assert!(!Error::NoFlavor {
            memory_mib: 1,
            disk_gb: 1
        }
        .is_recoverable());
    }
}
