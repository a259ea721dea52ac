// src/shell/transport.rs

//! Transport layer for interactive shell sessions
//!
//! The engine talks to remote hosts through the `ShellTransport` /
//! `ShellStream` pair. The traits are the boundary to the transport
//! library: anything that can open an authenticated interactive shell and
//! move bytes both ways can back a `Session`. The bundled
//! `OpenSshTransport` spawns the system `ssh` client with the option set
//! every outgoing ssh/scp invocation in this crate uses.

use crate::error::{Error, Result};
use crate::shell::endpoint::{HostEndpoint, LoginSecret};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// SSH options applied to every outgoing ssh/scp invocation, both in this
/// transport and in helper commands executed on remote hosts.
pub const SSH_OPTIONS: &[(&str, &str)] = &[
    ("UserKnownHostsFile", "/dev/null"),
    ("StrictHostKeyChecking", "no"),
    ("NumberOfPasswordPrompts", "1"),
    ("ConnectTimeout", "15"),
    ("ServerAliveInterval", "30"),
];

/// The option set rendered as `-o K=V -o K=V ...` for embedding in a remote
/// helper command line.
pub fn ssh_option_args() -> String {
    SSH_OPTIONS
        .iter()
        .map(|(k, v)| format!("-o {}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One authenticated interactive shell
///
/// Implementations deliver the remote shell's merged output stream and
/// accept raw input. `recv` resolves as soon as any output is available;
/// `Ok(None)` signals that the peer closed the stream.
#[async_trait]
pub trait ShellStream: Send + std::fmt::Debug {
    /// Write raw bytes to the remote shell's input.
    async fn send(&mut self, data: &str) -> Result<()>;

    /// Read the next available chunk of output. `None` means EOF.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Tear the stream down. Safe to call more than once.
    async fn close(&mut self);
}

/// Factory for authenticated shell streams
#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Open an interactive shell on the endpoint.
    ///
    /// The returned stream is already authenticated; the `Session` layered
    /// on top installs its prompt sentinel as its first act.
    async fn connect(&self, endpoint: &HostEndpoint) -> Result<Box<dyn ShellStream>>;
}

/// Transport backed by the system OpenSSH client
///
/// Spawns `ssh -tt` with piped stdio. Key-based authentication is handled
/// here; password logins belong to transport implementations with real PTY
/// control. Escalation password challenges (`su`, `sudo`) happen inside
/// the shell stream and are independent of this limitation.
#[derive(Debug, Default)]
pub struct OpenSshTransport;

impl OpenSshTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellTransport for OpenSshTransport {
    async fn connect(&self, endpoint: &HostEndpoint) -> Result<Box<dyn ShellStream>> {
        if endpoint.hostname.is_empty() {
            return Err(Error::InvalidHostname("empty hostname".to_string()));
        }

        let mut cmd = Command::new("ssh");
        cmd.arg("-tt");
        for (k, v) in SSH_OPTIONS {
            cmd.arg("-o").arg(format!("{}={}", k, v));
        }
        cmd.arg("-p").arg(endpoint.port.to_string());
        if let LoginSecret::Key { path, .. } = &endpoint.secret {
            cmd.arg("-i").arg(path);
        }
        cmd.arg(format!("{}@{}", endpoint.username, endpoint.hostname));

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Opening ssh stream to {}", endpoint.label());

        let mut child = cmd.spawn().map_err(|e| Error::SessionLost {
            host: endpoint.hostname.clone(),
            reason: format!("failed to spawn ssh: {}", e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::SessionLost {
            host: endpoint.hostname.clone(),
            reason: "ssh child had no stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::SessionLost {
            host: endpoint.hostname.clone(),
            reason: "ssh child had no stdout".to_string(),
        })?;

        // ssh's own stderr (banners, host key warnings) is traced, never
        // mixed into the framed output stream.
        if let Some(stderr) = child.stderr.take() {
            let host = endpoint.hostname.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[ssh:{}] {}", host, line);
                }
            });
        }

        Ok(Box::new(OpenSshStream {
            host: endpoint.hostname.clone(),
            child,
            stdin,
            stdout,
            closed: false,
        }))
    }
}

/// Shell stream over an `ssh` child process
#[derive(Debug)]
struct OpenSshStream {
    host: String,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    closed: bool,
}

#[async_trait]
impl ShellStream for OpenSshStream {
    async fn send(&mut self, data: &str) -> Result<()> {
        self.stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| Error::SessionLost {
                host: self.host.clone(),
                reason: format!("write failed: {}", e),
            })?;
        self.stdin.flush().await.map_err(|e| Error::SessionLost {
            host: self.host.clone(),
            reason: format!("flush failed: {}", e),
        })
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        let mut buf = [0u8; 8192];
        let n = self
            .stdout
            .read(&mut buf)
            .await
            .map_err(|e| Error::SessionLost {
                host: self.host.clone(),
                reason: format!("read failed: {}", e),
            })?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.child.kill().await {
            warn!("Failed to reap ssh child for {}: {}", self.host, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_option_args_rendering() {
        let args = ssh_option_args();
        assert!(args.contains("-o UserKnownHostsFile=/dev/null"));
        assert!(args.contains("-o StrictHostKeyChecking=no"));
        assert!(args.contains("-o NumberOfPasswordPrompts=1"));
        assert!(args.contains("-o ConnectTimeout=15"));
        assert!(args.contains("-o ServerAliveInterval=30"));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_hostname() {
        let transport = OpenSshTransport::new();
        let ep = HostEndpoint::root_with_password("", "pw");
        let err = transport.connect(&ep).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHostname(_)));
    }
}
