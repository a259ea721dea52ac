// src/provision/mod.rs

//! Provisioner interface
//!
//! The compute provider is an external collaborator. The orchestrator
//! only needs the operations below; concrete adapters live outside this
//! crate and own every provider-specific detail, including resolving the
//! catalog's opaque image identifiers to region-specific ones.

use crate::error::Result;
use crate::shell::HostEndpoint;
use async_trait::async_trait;

/// What the orchestrator asks the provider to build
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub image_id: String,
    pub flavor_id: String,
    pub name: String,
    pub region: Option<String>,
}

/// A created instance: provider handle plus a login-ready endpoint
#[derive(Debug, Clone)]
pub struct ProvisionedHost {
    pub id: String,
    pub endpoint: HostEndpoint,
}

/// Compute provider operations the pipeline relies on
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create an instance and return its login-ready endpoint.
    async fn create_instance(&self, request: &ProvisionRequest) -> Result<ProvisionedHost>;

    /// Block until the instance accepts logins.
    async fn wait_until_ready(&self, id: &str) -> Result<()>;

    /// Block until post-boot automation finishes on managed accounts.
    async fn wait_until_managed_automation_done(&self, id: &str) -> Result<()>;

    /// Put a pre-existing instance into rescue mode; returns the rescue
    /// root password.
    async fn rescue_mode(&self, id: &str) -> Result<String>;

    /// Tear an instance down.
    async fn destroy(&self, id: &str) -> Result<()>;
}
