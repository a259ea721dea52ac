// src/shell/session.rs

//! Interactive shell session with framed command execution
//!
//! A `Session` wraps one `ShellStream` and turns it into a query interface:
//! every command is wrapped in a unique per-call tag, the output is
//! extracted between the tag lines, and completion is detected by the
//! prompt sentinel installed at login. Commands on one session are totally
//! ordered through the per-session lock; a keep-alive runs while the
//! session is idle.
//!
//! Lifecycle: `Disconnected -> Authenticating -> Connected -> Elevated ->
//! Closed`. Elevation is sticky: once `as_root` has escalated, later calls
//! reuse the root shell.

use crate::error::{Error, Result};
use crate::shell::endpoint::{Escalation, HostEndpoint};
use crate::shell::transport::{ShellStream, ShellTransport};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prompt sentinel installed as `PS1` after login. End-of-output marker
/// for every framed command.
pub const PROMPT_SENTINEL: &str = "@@CLOUDFLOCK@@";

/// Login attempts before `LoginFailed`
const AUTH_ATTEMPTS: u32 = 5;

/// Cap for the exponential auth backoff
const AUTH_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Deadline for the authentication handshake itself
const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Idle keep-alive interval
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// How long to wait for the prompt after interrupting a command
const INTERRUPT_DRAIN: Duration = Duration::from_secs(2);

/// Connection state, for observability and invariant checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Authenticating,
    Connected,
    Elevated,
    Closed,
}

/// Observer for raw PTY output as it arrives; used to stream
/// long-running command output to verbose front-ends.
pub type OutputTap = Arc<dyn Fn(&str) + Send + Sync>;

/// Counters exposed for the run journal
#[derive(Debug, Default)]
pub struct SessionStats {
    commands: AtomicU64,
    reconnects: AtomicU64,
}

impl SessionStats {
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

struct SessionState {
    stream: Option<Box<dyn ShellStream>>,
    buffer: String,
    conn: ConnState,
    hostname: Option<String>,
    phase: String,
}

/// How one framed command ended
enum FrameOutcome {
    Complete,
    TimedOut,
    Cancelled,
}

/// One authenticated shell session against a host
///
/// Cheap to clone; clones share the underlying stream and serialize
/// through the same lock.
#[derive(Clone)]
pub struct Session {
    endpoint: HostEndpoint,
    transport: Arc<dyn ShellTransport>,
    state: Arc<Mutex<SessionState>>,
    stats: Arc<SessionStats>,
    keepalive: Arc<Mutex<Option<JoinHandle<()>>>>,
    tap: Arc<std::sync::Mutex<Option<OutputTap>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session: authenticate with bounded retries, install the
    /// prompt sentinel, and start the idle keep-alive.
    pub async fn open(transport: Arc<dyn ShellTransport>, endpoint: HostEndpoint) -> Result<Self> {
        let session = Self {
            endpoint,
            transport,
            state: Arc::new(Mutex::new(SessionState {
                stream: None,
                buffer: String::new(),
                conn: ConnState::Disconnected,
                hostname: None,
                phase: "connect".to_string(),
            })),
            stats: Arc::new(SessionStats::default()),
            keepalive: Arc::new(Mutex::new(None)),
            tap: Arc::new(std::sync::Mutex::new(None)),
        };

        let mut last_err = String::new();
        for attempt in 1..=AUTH_ATTEMPTS {
            let mut state = session.state.lock().await;
            state.conn = ConnState::Authenticating;
            match session.connect_locked(&mut state).await {
                Ok(()) => {
                    state.conn = ConnState::Connected;
                    drop(state);
                    session.spawn_keepalive().await;
                    info!("Session open to {}", session.endpoint.label());
                    return Ok(session);
                }
                Err(e) => {
                    last_err = e.to_string();
                    state.conn = ConnState::Disconnected;
                    drop(state);
                    if attempt < AUTH_ATTEMPTS {
                        let backoff =
                            Duration::from_secs(1 << (attempt - 1)).min(AUTH_BACKOFF_CAP);
                        warn!(
                            "Login attempt {}/{} to {} failed ({}), retrying in {:?}",
                            attempt,
                            AUTH_ATTEMPTS,
                            session.endpoint.label(),
                            last_err,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(Error::LoginFailed {
            host: session.endpoint.hostname.clone(),
            attempts: AUTH_ATTEMPTS,
            reason: last_err,
        })
    }

    /// The endpoint this session is bound to
    pub fn endpoint(&self) -> &HostEndpoint {
        &self.endpoint
    }

    /// Command and reconnect counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Label the current pipeline phase; carried into error context.
    pub async fn set_phase(&self, phase: &str) {
        self.state.lock().await.phase = phase.to_string();
    }

    /// Install or clear the raw-output observer. While set, every chunk
    /// read off the stream is passed to it as it arrives.
    pub fn set_tap(&self, tap: Option<OutputTap>) {
        *self.tap.lock().unwrap() = tap;
    }

    /// Execute one command and return its trimmed stdout+stderr.
    ///
    /// `timeout` of zero means no deadline. On deadline with `recoverable`
    /// set, whatever output accumulated is returned instead of an error.
    pub async fn query(
        &self,
        command: &str,
        timeout: Duration,
        recoverable: bool,
    ) -> Result<String> {
        self.query_inner(command, timeout, recoverable, None).await
    }

    /// `query` that can also be interrupted through a cancellation token.
    /// Cancellation interrupts the remote command and fails with
    /// `Error::Cancelled`.
    pub async fn query_cancellable(
        &self,
        command: &str,
        timeout: Duration,
        recoverable: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.query_inner(command, timeout, recoverable, Some(cancel))
            .await
    }

    async fn query_inner(
        &self,
        command: &str,
        timeout: Duration,
        recoverable: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        self.stats.commands.fetch_add(1, Ordering::Relaxed);

        match self
            .run_framed(&mut state, command, timeout, recoverable, cancel)
            .await
        {
            Err(Error::SessionLost { .. }) => {
                // Reconnect once, then retry; a second loss is final.
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Transport to {} lost mid-command, reconnecting",
                    self.endpoint.label()
                );
                self.reconnect_locked(&mut state).await?;
                self.run_framed(&mut state, command, timeout, recoverable, cancel)
                    .await
            }
            other => other,
        }
    }

    /// Execute a command as root, escalating first if necessary.
    ///
    /// Idempotent with respect to identity: an already-elevated session
    /// (or a root login) delegates straight to `query`.
    pub async fn as_root(
        &self,
        command: &str,
        timeout: Duration,
        recoverable: bool,
    ) -> Result<String> {
        self.ensure_elevated().await?;
        self.query(command, timeout, recoverable).await
    }

    /// `as_root` with cancellation, for long-running worker commands.
    pub async fn as_root_cancellable(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.ensure_elevated().await?;
        self.query_cancellable(command, timeout, false, cancel).await
    }

    async fn ensure_elevated(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        if state.conn != ConnState::Elevated && self.endpoint.escalation != Escalation::AlreadyRoot
        {
            self.elevate_locked(&mut state).await?;
        }
        Ok(())
    }

    /// The remote hostname, cached after the first call
    pub async fn hostname(&self) -> Result<String> {
        {
            let state = self.state.lock().await;
            if let Some(name) = &state.hostname {
                return Ok(name.clone());
            }
        }
        let name = self
            .query("hostname", Duration::from_secs(30), false)
            .await?;
        let name = name.trim().to_string();
        self.state.lock().await.hostname = Some(name.clone());
        Ok(name)
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        if let Some(mut stream) = state.stream.take() {
            stream.close().await;
        }
        state.conn = ConnState::Closed;
        debug!("Session to {} closed", self.endpoint.label());
    }

    fn ensure_open(&self, state: &SessionState) -> Result<()> {
        if state.conn == ConnState::Closed || state.stream.is_none() {
            return Err(Error::SessionLost {
                host: self.endpoint.hostname.clone(),
                reason: "session is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Connect the transport and install the prompt sentinel.
    async fn connect_locked(&self, state: &mut SessionState) -> Result<()> {
        let mut stream = self.transport.connect(&self.endpoint).await?;

        // Install a deterministic prompt and disable echo so framing sees
        // only command output.
        let setup = format!(
            "unset PROMPT_COMMAND; stty -echo 2>/dev/null; export PS1='{}'\n",
            PROMPT_SENTINEL
        );
        stream.send(&setup).await?;

        let mut buffer = String::new();
        tokio::time::timeout(AUTH_TIMEOUT, async {
            loop {
                match stream.recv().await? {
                    Some(chunk) => {
                        buffer.push_str(&chunk);
                        if buffer.contains(PROMPT_SENTINEL) {
                            return Ok::<(), Error>(());
                        }
                    }
                    None => {
                        return Err(Error::SessionLost {
                            host: self.endpoint.hostname.clone(),
                            reason: "stream closed during login".to_string(),
                        })
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::LoginFailed {
            host: self.endpoint.hostname.clone(),
            attempts: 1,
            reason: "no prompt within auth deadline".to_string(),
        })??;

        state.stream = Some(stream);
        state.buffer.clear();
        Ok(())
    }

    /// Reconnect after a transport loss, restoring elevation if the
    /// session had it.
    async fn reconnect_locked(&self, state: &mut SessionState) -> Result<()> {
        let was_elevated = state.conn == ConnState::Elevated;
        if let Some(mut old) = state.stream.take() {
            old.close().await;
        }
        self.connect_locked(state)
            .await
            .map_err(|e| Error::SessionLost {
                host: self.endpoint.hostname.clone(),
                reason: format!("reconnect failed: {}", e),
            })?;
        state.conn = ConnState::Connected;
        if was_elevated && self.endpoint.escalation != Escalation::AlreadyRoot {
            self.elevate_locked(state).await?;
        }
        Ok(())
    }

    /// Escalate the shell to root through `su -` / `sudo su -`.
    async fn elevate_locked(&self, state: &mut SessionState) -> Result<()> {
        let cmd = match self.endpoint.escalation {
            Escalation::AlreadyRoot => return Ok(()),
            Escalation::Su => "su -\n",
            Escalation::Sudo => "sudo su -\n",
        };
        debug!("Escalating to root on {}", self.endpoint.label());

        let host = self.endpoint.hostname.clone();
        let stream = state.stream.as_mut().ok_or_else(|| Error::SessionLost {
            host: host.clone(),
            reason: "no stream".to_string(),
        })?;
        stream.send(cmd).await?;

        // Answer the password challenge if one appears; `sudo` may be
        // configured passwordless and go straight to a shell.
        let mut challenge = String::new();
        let saw_challenge = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match stream.recv().await? {
                    Some(chunk) => {
                        challenge.push_str(&chunk);
                        if challenge.to_lowercase().contains("assword") {
                            return Ok::<bool, Error>(true);
                        }
                    }
                    None => {
                        return Err(Error::SessionLost {
                            host: host.clone(),
                            reason: "stream closed during escalation".to_string(),
                        })
                    }
                }
            }
        })
        .await
        .unwrap_or(Ok(false))?;

        if saw_challenge {
            let password =
                self.endpoint
                    .escalation_password()
                    .ok_or_else(|| Error::NotSuperuser {
                        host: self.endpoint.hostname.clone(),
                        detail: "password challenge with no root secret configured".to_string(),
                    })?;
            stream.send(&format!("{}\n", password)).await?;
        }

        // The root shell has its own prompt; reinstall the sentinel there.
        let setup = format!(
            "unset PROMPT_COMMAND; stty -echo 2>/dev/null; export PS1='{}'\n",
            PROMPT_SENTINEL
        );
        stream.send(&setup).await?;
        tokio::time::timeout(AUTH_TIMEOUT, async {
            let mut seen = String::new();
            loop {
                match stream.recv().await? {
                    Some(chunk) => {
                        seen.push_str(&chunk);
                        if seen.contains(PROMPT_SENTINEL) {
                            return Ok::<(), Error>(());
                        }
                    }
                    None => {
                        return Err(Error::SessionLost {
                            host: host.clone(),
                            reason: "stream closed installing root prompt".to_string(),
                        })
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::NotSuperuser {
            host: self.endpoint.hostname.clone(),
            detail: "no shell prompt after escalation".to_string(),
        })??;
        state.buffer.clear();

        // Verify the identity actually changed.
        let id_out = self
            .run_framed(state, "id", Duration::from_secs(30), false, None)
            .await?;
        if !id_out.contains("uid=0") {
            return Err(Error::NotSuperuser {
                host: self.endpoint.hostname.clone(),
                detail: format!("id reported: {}", id_out),
            });
        }

        state.conn = ConnState::Elevated;
        info!("Escalated to root on {}", self.endpoint.label());
        Ok(())
    }

    /// Send one tag-framed command and collect its output.
    async fn run_framed(
        &self,
        state: &mut SessionState,
        command: &str,
        timeout: Duration,
        recoverable: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        // Line terminators inside the command would break framing.
        let command = command.replace(['\n', '\r'], " ");
        let tag = call_tag();
        let wrapped = format!("echo {tag}; {{ {command} ; }} 2>&1; echo {tag}\n");

        state.buffer.clear();
        let host = self.endpoint.hostname.clone();
        let phase = state.phase.clone();

        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(tokio::time::Instant::now() + timeout)
        };

        let tap = self.tap.lock().unwrap().clone();
        let stream = state.stream.as_mut().ok_or_else(|| Error::SessionLost {
            host: host.clone(),
            reason: "no stream".to_string(),
        })?;
        stream.send(&wrapped).await?;

        let mut outcome = FrameOutcome::Complete;
        loop {
            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let cancelled = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                chunk = stream.recv() => {
                    match chunk? {
                        Some(data) => {
                            if let Some(tap) = &tap {
                                tap(&data);
                            }
                            state.buffer.push_str(&data);
                            if frame_complete(&state.buffer, &tag) {
                                break;
                            }
                        }
                        None => {
                            return Err(Error::SessionLost {
                                host,
                                reason: "stream closed mid-command".to_string(),
                            });
                        }
                    }
                }
                _ = expiry => {
                    outcome = FrameOutcome::TimedOut;
                    break;
                }
                _ = cancelled => {
                    outcome = FrameOutcome::Cancelled;
                    break;
                }
            }
        }

        match outcome {
            FrameOutcome::Complete => Ok(extract_between_tags(&state.buffer, &tag)),
            FrameOutcome::TimedOut => {
                // Snapshot before the interrupt drain pollutes the buffer.
                let partial = extract_partial(&state.buffer, &tag);
                self.interrupt_command(state).await;
                if recoverable {
                    debug!(
                        "Command on {} hit {}s deadline, returning partial output",
                        host,
                        timeout.as_secs()
                    );
                    Ok(partial)
                } else {
                    Err(Error::DeadlineExceeded {
                        host,
                        phase,
                        tag,
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
            FrameOutcome::Cancelled => {
                self.interrupt_command(state).await;
                debug!("Command on {} cancelled", host);
                Err(Error::Cancelled { alarms: Vec::new() })
            }
        }
    }

    /// Deliver an interrupt to the foreground remote command and drain
    /// until the shell prompt returns, so the stream is usable again.
    async fn interrupt_command(&self, state: &mut SessionState) {
        let Some(stream) = state.stream.as_mut() else {
            return;
        };
        if stream.send("\x03\n").await.is_err() {
            return;
        }
        let _ = tokio::time::timeout(INTERRUPT_DRAIN, async {
            loop {
                match stream.recv().await {
                    Ok(Some(chunk)) => {
                        state.buffer.push_str(&chunk);
                        if state.buffer.trim_end().ends_with(PROMPT_SENTINEL) {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        })
        .await;
    }

    /// Start the idle keep-alive task. Skips any tick where the session
    /// lock is held by a command in flight.
    async fn spawn_keepalive(&self) {
        let state = Arc::clone(&self.state);
        let label = self.endpoint.label();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Ok(mut guard) = state.try_lock() else {
                    // A command is in flight; the session is not idle.
                    continue;
                };
                if guard.conn == ConnState::Closed {
                    break;
                }
                if let Some(stream) = guard.stream.as_mut() {
                    if stream.send("\n").await.is_err() {
                        debug!("Keep-alive to {} failed", label);
                    }
                }
            }
        });
        *self.keepalive.lock().await = Some(handle);
    }
}

/// Per-call tag: `fk` plus eight characters from `[A-Za-z0-9_-]`
fn call_tag() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
    let mut rng = rand::thread_rng();
    let body: String = (0..8)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("fk{}", body)
}

/// A frame is complete when two lines consist of exactly the tag and the
/// prompt sentinel has reappeared after the closing tag.
fn frame_complete(buffer: &str, tag: &str) -> bool {
    let mut tag_lines = 0usize;
    for line in buffer.lines() {
        if line.trim() == tag {
            tag_lines += 1;
        }
    }
    tag_lines >= 2 && buffer.trim_end().ends_with(PROMPT_SENTINEL)
}

/// Output between the opening and closing tag lines, trimmed
fn extract_between_tags(buffer: &str, tag: &str) -> String {
    let mut collected: Vec<&str> = Vec::new();
    let mut inside = false;
    for line in buffer.lines() {
        if line.trim() == tag {
            if inside {
                break;
            }
            inside = true;
            continue;
        }
        if inside {
            collected.push(line);
        }
    }
    collected.join("\n").trim().to_string()
}

/// Partial output after the opening tag, for recoverable deadline hits
fn extract_partial(buffer: &str, tag: &str) -> String {
    let mut collected: Vec<&str> = Vec::new();
    let mut inside = false;
    for line in buffer.lines() {
        if line.trim() == tag {
            inside = true;
            continue;
        }
        if inside {
            collected.push(line);
        }
    }
    collected.join("\n").trim().to_string()
}
