// src/commands.rs
//! Command handlers for the CloudFlock CLI

use anyhow::{Context, Result};
use cloudflock::progress::ProgressSink;
use cloudflock::{MigrationRequest, OpenSshTransport, Orchestrator};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Spinner-backed progress sink for interactive runs
pub struct CliProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl CliProgress {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar, verbose }
    }
}

impl ProgressSink for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.println(format!("==> {}", name));
        self.bar.set_message(name.to_string());
    }

    fn status(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn pty_output(&self, chunk: &str) {
        if self.verbose {
            for line in chunk.lines() {
                self.bar.println(line.to_string());
            }
        }
    }

    fn finish(&self, success: bool, message: &str) {
        if success {
            self.bar.finish_with_message(message.to_string());
        } else {
            self.bar.abandon_with_message(message.to_string());
        }
    }
}

/// Load and validate a migration request from a JSON config file.
pub fn load_request(path: &Path) -> Result<MigrationRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let request: MigrationRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    request.validate().context("validating config")?;
    Ok(request)
}

/// `cloudflock profile`: read-only source inspection.
pub async fn cmd_profile(config: &Path, json: bool, legacy: bool, verbose: bool) -> Result<()> {
    let request = load_request(config)?;
    let progress = Arc::new(CliProgress::new(verbose));
    let mut orchestrator = Orchestrator::new(
        Arc::new(OpenSshTransport::new()),
        None,
        request,
        progress.clone(),
    );
    if legacy {
        orchestrator = orchestrator.with_catalog(&cloudflock::CATALOG_V1);
    }

    let (profile, recommendation) = orchestrator.profile_only().await?;
    progress.finish(true, "Profile complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        print!("{}", profile);
    }
    if let Some(rec) = recommendation {
        println!(
            "Recommended flavor: {} ({} MiB / {} GB) driven by {}",
            rec.flavor.spec.id, rec.flavor.spec.memory_mib, rec.flavor.spec.disk_gb, rec.flavor.reason
        );
        match rec.image_id {
            Some(image) => println!("Image: {}", image),
            None => println!("Image: none mapped for this platform"),
        }
    }
    Ok(())
}

/// `cloudflock migrate`: the full pipeline. Without a provisioning
/// adapter only resume mode can reach a destination.
pub async fn cmd_migrate(config: &Path, resume: bool, legacy: bool, verbose: bool) -> Result<()> {
    let mut request = load_request(config)?;
    if resume {
        request.resume = true;
    }
    request.validate().context("validating config")?;

    let progress = Arc::new(CliProgress::new(verbose));
    let mut orchestrator = Orchestrator::new(
        Arc::new(OpenSshTransport::new()),
        None,
        request,
        progress,
    );
    if legacy {
        orchestrator = orchestrator.with_catalog(&cloudflock::CATALOG_V1);
    }

    let outcome = orchestrator.run().await?;
    println!("Migration finished in state {:?}", outcome.final_state);
    Ok(())
}
