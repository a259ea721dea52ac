// src/shell/endpoint.rs

//! Host endpoint description
//!
//! A `HostEndpoint` carries everything needed to open an authenticated
//! session against one host: address, login identity, and the escalation
//! policy for reaching root. Endpoints are built from operator input or
//! from provisioner output and never change once a session is open.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Login secret for the initial authentication
#[derive(Clone, Serialize, Deserialize)]
pub enum LoginSecret {
    /// Plain password authentication
    Password(String),
    /// Private key file with an optional passphrase
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for LoginSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginSecret::Password(_) => write!(f, "Password(***)"),
            LoginSecret::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// How the session reaches an effective uid of 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Escalation {
    /// The login user is already root
    AlreadyRoot,
    /// `su -` with the root password
    Su,
    /// `sudo su -`, answering with the login user's password
    Sudo,
}

/// A single host the engine can open a session against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEndpoint {
    /// Hostname or IP address
    pub hostname: String,
    /// TCP port, 22 unless overridden
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login secret
    pub secret: LoginSecret,
    /// Escalation policy
    pub escalation: Escalation,
    /// Root password for `su`-based escalation
    pub root_password: Option<String>,
}

impl HostEndpoint {
    /// Endpoint for a root login over password auth
    pub fn root_with_password(hostname: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: 22,
            username: "root".to_string(),
            secret: LoginSecret::Password(password.into()),
            escalation: Escalation::AlreadyRoot,
            root_password: None,
        }
    }

    /// Endpoint for a non-root login that reaches root through `su -`
    pub fn user_with_su(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        root_password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: 22,
            username: username.into(),
            secret: LoginSecret::Password(password.into()),
            escalation: Escalation::Su,
            root_password: Some(root_password.into()),
        }
    }

    /// Override the TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The `user@host` form used in log lines
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    /// Password expected at an escalation challenge, if any
    pub fn escalation_password(&self) -> Option<&str> {
        match self.escalation {
            Escalation::AlreadyRoot => None,
            // `sudo` challenges with the login user's own password
            Escalation::Sudo => match &self.secret {
                LoginSecret::Password(p) => Some(p.as_str()),
                LoginSecret::Key { .. } => self.root_password.as_deref(),
            },
            Escalation::Su => self.root_password.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacts() {
        let s = LoginSecret::Password("hunter2".to_string());
        assert!(!format!("{:?}", s).contains("hunter2"));

        let k = LoginSecret::Key {
            path: PathBuf::from("/root/.ssh/id_rsa"),
            passphrase: Some("hunter2".to_string()),
        };
        assert!(!format!("{:?}", k).contains("hunter2"));
    }

    #[test]
    fn test_escalation_password_selection() {
        let su = HostEndpoint::user_with_su("h", "admin", "userpw", "rootpw");
        assert_eq!(su.escalation_password(), Some("rootpw"));

        let mut sudo = su.clone();
        sudo.escalation = Escalation::Sudo;
        assert_eq!(sudo.escalation_password(), Some("userpw"));

        let root = HostEndpoint::root_with_password("h", "pw");
        assert_eq!(root.escalation_password(), None);
    }

    #[test]
    fn test_label() {
        let ep = HostEndpoint::root_with_password("192.0.2.10", "pw").with_port(2222);
        assert_eq!(ep.label(), "root@192.0.2.10:2222");
    }
}
