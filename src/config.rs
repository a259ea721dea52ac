// src/config.rs

//! Typed configuration carriers
//!
//! The CLI reconciles its options bag and prompts into these structs; the
//! engine and orchestrator only ever see the typed form. A `HostSpec` is
//! the operator's description of one host and converts into a
//! `HostEndpoint` once it is structurally complete.

use crate::error::{Error, Result};
use crate::shell::{Escalation, HostEndpoint, LoginSecret};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One host as described by operator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub root_password: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl HostSpec {
    /// Validate the spec and convert it into an endpoint.
    pub fn to_endpoint(&self) -> Result<HostEndpoint> {
        if self.hostname.is_empty() {
            return Err(Error::ConfigError("host spec has no hostname".to_string()));
        }
        if self.username.is_empty() {
            return Err(Error::ConfigError(format!(
                "host spec for {} has no username",
                self.hostname
            )));
        }

        let secret = match (&self.key_path, &self.password) {
            (Some(path), _) => LoginSecret::Key {
                path: path.clone(),
                passphrase: self.key_passphrase.clone(),
            },
            (None, Some(password)) => LoginSecret::Password(password.clone()),
            (None, None) => {
                return Err(Error::ConfigError(format!(
                    "host spec for {} has neither password nor key",
                    self.hostname
                )))
            }
        };

        let escalation = if self.username == "root" {
            Escalation::AlreadyRoot
        } else if self.sudo {
            Escalation::Sudo
        } else {
            Escalation::Su
        };

        if escalation == Escalation::Su && self.root_password.is_none() {
            return Err(Error::ConfigError(format!(
                "host spec for {} needs a root password for su escalation",
                self.hostname
            )));
        }

        Ok(HostEndpoint {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            secret,
            escalation,
            root_password: self.root_password.clone(),
        })
    }
}

/// Everything the orchestrator needs for one migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// The live host to migrate
    pub source: HostSpec,
    /// Pre-existing destination; required in resume mode
    #[serde(default)]
    pub destination: Option<HostSpec>,
    /// Provider handle for the destination, for rescue mode
    #[serde(default)]
    pub destination_instance_id: Option<String>,
    /// Skip provisioning and reuse the given destination
    #[serde(default)]
    pub resume: bool,
    /// Put the pre-existing destination into rescue mode first
    #[serde(default)]
    pub rescue: bool,
    /// Managed account: wait for post-boot automation before touching the
    /// destination
    #[serde(default)]
    pub managed: bool,
    /// Region passed through to the provisioner untouched
    #[serde(default)]
    pub region: Option<String>,
    /// Name for the provisioned instance; defaults to the source hostname
    #[serde(default)]
    pub instance_name: Option<String>,
    /// Operator override for the IP rewrite plan
    #[serde(default)]
    pub ip_rewrites: Option<Vec<(String, String)>>,
    /// Operator override for remediation target directories
    #[serde(default)]
    pub target_dirs: Option<Vec<String>>,
    /// Journal file for this run; no journal when unset
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl MigrationRequest {
    pub fn new(source: HostSpec) -> Self {
        Self {
            source,
            destination: None,
            destination_instance_id: None,
            resume: false,
            rescue: false,
            managed: false,
            region: None,
            instance_name: None,
            ip_rewrites: None,
            target_dirs: None,
            journal_path: None,
        }
    }

    /// Structural validation beyond per-host checks
    pub fn validate(&self) -> Result<()> {
        self.source.to_endpoint()?;
        if self.resume && self.destination.is_none() {
            return Err(Error::ConfigError(
                "resume mode needs a destination host spec".to_string(),
            ));
        }
        if self.rescue && self.destination_instance_id.is_none() {
            return Err(Error::ConfigError(
                "rescue mode needs the destination instance id".to_string(),
            ));
        }
        if let Some(dest) = &self.destination {
            dest.to_endpoint()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> HostSpec {
        HostSpec {
            hostname: "src.example.com".to_string(),
            port: 22,
            username: "root".to_string(),
            password: Some("pw".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_root_spec_converts() {
        let ep = spec().to_endpoint().unwrap();
        assert_eq!(ep.escalation, Escalation::AlreadyRoot);
        assert_eq!(ep.port, 22);
    }

    #[test]
    fn test_sudo_and_su_escalation() {
        let mut s = spec();
        s.username = "admin".to_string();
        s.sudo = true;
        assert_eq!(s.to_endpoint().unwrap().escalation, Escalation::Sudo);

        s.sudo = false;
        assert!(s.to_endpoint().is_err());
        s.root_password = Some("rootpw".to_string());
        assert_eq!(s.to_endpoint().unwrap().escalation, Escalation::Su);
    }

    #[test]
    fn test_missing_secret_rejected() {
        let mut s = spec();
        s.password = None;
        assert!(matches!(s.to_endpoint(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_resume_requires_destination() {
        let mut req = MigrationRequest::new(spec());
        req.resume = true;
        assert!(req.validate().is_err());
        req.destination = Some(spec());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let mut req = MigrationRequest::new(spec());
        req.managed = true;
        req.target_dirs = Some(vec!["/etc".to_string(), "/opt/app".to_string()]);
        let json = serde_json::to_string(&req).unwrap();
        let back: MigrationRequest = serde_json::from_str(&json).unwrap();
        assert!(back.managed);
        assert_eq!(back.target_dirs.unwrap().len(), 2);
    }
}
