// src/progress.rs

//! Progress reporting trait and implementations
//!
//! The engine reports phase changes and streams PTY output through a
//! `ProgressSink` so the core never touches a terminal. The CLI owns the
//! visual implementation; the library ships a tracing-backed one and a
//! no-op for scripted use.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Sink for migration progress
///
/// Implementations must be thread-safe; watchdog tasks and the rsync
/// worker report concurrently.
pub trait ProgressSink: Send + Sync {
    /// A new pipeline phase began
    fn phase(&self, name: &str);

    /// A human-readable status line within the current phase
    fn status(&self, message: &str);

    /// Raw PTY output captured from a long-running remote command. Only
    /// verbose front-ends render this.
    fn pty_output(&self, chunk: &str);

    /// The pipeline finished, successfully or not
    fn finish(&self, success: bool, message: &str);
}

/// No-op sink for scripted/quiet use
#[derive(Debug, Default)]
pub struct SilentProgress {
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl ProgressSink for SilentProgress {
    fn phase(&self, _name: &str) {}

    fn status(&self, _message: &str) {}

    fn pty_output(&self, _chunk: &str) {}

    fn finish(&self, _success: bool, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Sink that forwards everything to tracing
#[derive(Debug, Default)]
pub struct LogProgress;

impl LogProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressSink for LogProgress {
    fn phase(&self, name: &str) {
        info!("Phase: {}", name);
    }

    fn status(&self, message: &str) {
        info!("{}", message);
    }

    fn pty_output(&self, chunk: &str) {
        for line in chunk.lines() {
            tracing::debug!("[pty] {}", line);
        }
    }

    fn finish(&self, success: bool, message: &str) {
        if success {
            info!("Finished: {}", message);
        } else {
            tracing::error!("Failed: {}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_progress_tracks_finish() {
        let sink = SilentProgress::new();
        assert!(!sink.is_finished());
        sink.phase("migrate");
        sink.status("pass 1");
        sink.finish(true, "done");
        assert!(sink.is_finished());
    }
}
