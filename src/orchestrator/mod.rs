// src/orchestrator/mod.rs

//! End-to-end migration state machine
//!
//! The orchestrator wires the profiler, catalogs, exclusion and cleanup
//! builders, migration engine, and the external provisioner into one run:
//!
//! ```text
//! Start -> ConnectSource -> Profile -> Recommend
//!       -> [resume] ConnectDestination | Provision -> ConnectDestination
//!       -> BuildExclusions -> Migrate (alarms loop inside) -> Cleanup
//!       -> Remediate -> Done
//! any step -> unrecoverable -> Failed
//! ```
//!
//! Migrate requires both sessions open and root; Cleanup only runs after
//! the engine reports both passes done; Remediate is best-effort. Every
//! transition lands in the run journal when one is configured.

mod journal;

pub use journal::{Journal, JournalRecord};

use crate::cleanup::CleanupRunner;
use crate::config::MigrationRequest;
use crate::error::{Error, Result};
use crate::migrate::{EngineSessions, MigrationEngine};
use crate::platform::{Catalog, FlavorRecommendation, CATALOG_V2};
use crate::profile::{HostProfiler, Profile};
use crate::progress::ProgressSink;
use crate::provision::{ProvisionRequest, Provisioner};
use crate::remediate::{pair_addresses, IpRemediator, IpRewrite};
use crate::shell::{HostEndpoint, Session, ShellTransport};
use crate::actions::exclusions_for;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline states; `Done` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrateState {
    Start,
    ConnectSource,
    Profile,
    Recommend,
    Provision,
    ConnectDestination,
    BuildExclusions,
    Migrate,
    Cleanup,
    Remediate,
    Done,
    Failed,
}

impl MigrateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// What profiling recommends for the destination
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub flavor: FlavorRecommendation,
    pub image_id: Option<String>,
}

/// Result of a completed (or failed) run
#[derive(Debug)]
pub struct MigrationOutcome {
    pub final_state: MigrateState,
    pub source_profile: Option<Profile>,
    pub recommendation: Option<Recommendation>,
}

struct RunContext {
    state: MigrateState,
    journal: Option<Journal>,
    source: Option<Session>,
    destination: Option<Session>,
    source_monitor: Option<Session>,
    destination_monitor: Option<Session>,
    source_profile: Option<Profile>,
    recommendation: Option<Recommendation>,
}

/// Drives one migration from operator request to terminal state
pub struct Orchestrator {
    transport: Arc<dyn ShellTransport>,
    provisioner: Option<Arc<dyn Provisioner>>,
    request: MigrationRequest,
    catalog: &'static Catalog,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ShellTransport>,
        provisioner: Option<Arc<dyn Provisioner>>,
        request: MigrationRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            transport,
            provisioner,
            request,
            catalog: &CATALOG_V2,
            progress,
        }
    }

    /// Use a different catalog generation (the default is V2).
    pub fn with_catalog(mut self, catalog: &'static Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Profile the source and report a recommendation without migrating.
    /// Catalog misses are warnings here, not failures.
    pub async fn profile_only(&self) -> Result<(Profile, Option<Recommendation>)> {
        let endpoint = self.request.source.to_endpoint()?;
        self.progress.phase("Profiling source");
        let session = Session::open(Arc::clone(&self.transport), endpoint).await?;
        let result = async {
            let mut profile = HostProfiler::new(session.clone()).run().await?;
            let recommendation = match self.recommend(&profile) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    profile.warn(e.to_string());
                    None
                }
            };
            Ok((profile, recommendation))
        }
        .await;
        session.close().await;
        result
    }

    /// Run the full pipeline to a terminal state.
    pub async fn run(&self) -> Result<MigrationOutcome> {
        self.request.validate()?;

        let mut ctx = RunContext {
            state: MigrateState::Start,
            journal: self.open_journal(),
            source: None,
            destination: None,
            source_monitor: None,
            destination_monitor: None,
            source_profile: None,
            recommendation: None,
        };
        self.journal_append(
            &mut ctx,
            JournalRecord::RunStarted {
                source: self.request.source.hostname.clone(),
                timestamp: Utc::now(),
            },
        );

        let result = self.execute(&mut ctx).await;

        let success = result.is_ok();
        if !success {
            self.transition(&mut ctx, MigrateState::Failed);
        }
        self.record_session_stats(&mut ctx);
        let final_state = ctx.state;
        self.journal_append(
            &mut ctx,
            JournalRecord::RunFinished {
                success,
                final_state,
                timestamp: Utc::now(),
            },
        );
        if let Some(journal) = ctx.journal.as_mut() {
            if let Err(e) = journal.barrier() {
                warn!("Journal barrier failed: {}", e);
            }
        }

        for session in [
            ctx.source.take(),
            ctx.destination.take(),
            ctx.source_monitor.take(),
            ctx.destination_monitor.take(),
        ]
        .into_iter()
        .flatten()
        {
            session.close().await;
        }

        match result {
            Ok(()) => {
                self.progress.finish(true, "Migration complete");
                Ok(MigrationOutcome {
                    final_state: ctx.state,
                    source_profile: ctx.source_profile,
                    recommendation: ctx.recommendation,
                })
            }
            Err(e) => {
                self.progress.finish(false, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        // ConnectSource
        self.transition(ctx, MigrateState::ConnectSource);
        self.progress.phase("Connecting to source");
        let source_endpoint = self.request.source.to_endpoint()?;
        let source = Session::open(Arc::clone(&self.transport), source_endpoint).await?;
        ctx.source = Some(source.clone());

        // Profile
        self.transition(ctx, MigrateState::Profile);
        self.progress.phase("Profiling source");
        let profile = HostProfiler::new(source.clone()).run().await?;
        for warning in profile.warnings() {
            warn!("Profile warning: {}", warning);
        }

        // Recommend
        self.transition(ctx, MigrateState::Recommend);
        let recommendation = self.recommend(&profile)?;
        info!(
            "Recommended flavor {} ({}); image {:?}",
            recommendation.flavor.spec.id, recommendation.flavor.reason, recommendation.image_id
        );
        ctx.recommendation = Some(recommendation.clone());

        // Provision or reuse
        let destination_endpoint = if self.request.resume {
            self.check_resume_journal();
            let spec = self
                .request
                .destination
                .as_ref()
                .ok_or_else(|| Error::ConfigError("resume without destination".to_string()))?;
            self.rescue_endpoint(spec.to_endpoint()?).await?
        } else {
            self.transition(ctx, MigrateState::Provision);
            self.provision(&profile, &recommendation).await?
        };

        // ConnectDestination
        self.transition(ctx, MigrateState::ConnectDestination);
        self.progress.phase("Connecting to destination");
        let destination =
            Session::open(Arc::clone(&self.transport), destination_endpoint.clone()).await?;
        ctx.destination = Some(destination.clone());

        // BuildExclusions
        self.transition(ctx, MigrateState::BuildExclusions);
        let exclusions = exclusions_for(&profile.cpe);

        // Migrate; the engine loops internally on watchdog alarms.
        self.transition(ctx, MigrateState::Migrate);
        self.progress.phase("Migrating filesystem");
        let source_monitor =
            Session::open(Arc::clone(&self.transport), source.endpoint().clone()).await?;
        let destination_monitor =
            Session::open(Arc::clone(&self.transport), destination_endpoint).await?;
        ctx.source_monitor = Some(source_monitor.clone());
        ctx.destination_monitor = Some(destination_monitor.clone());

        let engine = MigrationEngine::new(
            EngineSessions {
                source: source.clone(),
                destination: destination.clone(),
                source_monitor,
                destination_monitor,
            },
            exclusions,
            Arc::clone(&self.progress),
        );
        engine.run().await?;
        self.journal_append(
            ctx,
            JournalRecord::PassComplete {
                pass: 2,
                timestamp: Utc::now(),
            },
        );

        // Cleanup: both passes have succeeded by this point.
        self.transition(ctx, MigrateState::Cleanup);
        self.progress.phase("Running cleanup phases");
        CleanupRunner::new(destination.clone(), profile.cpe.clone())
            .run()
            .await?;

        // Remediate: best-effort.
        self.transition(ctx, MigrateState::Remediate);
        self.progress.phase("Remediating IP references");
        if let Err(e) = self.remediate(&profile, &destination).await {
            warn!("Remediation failed (non-fatal): {}", e);
        }

        ctx.source_profile = Some(profile);
        self.transition(ctx, MigrateState::Done);
        Ok(())
    }

    /// Demand figures from the profile, resolved against the catalog.
    fn recommend(&self, profile: &Profile) -> Result<Recommendation> {
        let memory = profile
            .select_numeric("Memory", "^Used")
            .or_else(|| profile.select_numeric("Memory", "^Total"))
            .unwrap_or(0.0) as u64;
        let disk = profile
            .select_numeric("Storage", "Used Disk")
            .map(|gb| gb.ceil() as u64)
            .unwrap_or(0);
        let swapping = profile
            .select_numeric("Memory", "^Swap Used")
            .map(|used| used > 0.0)
            .unwrap_or(false);

        let flavor = self.catalog.flavor_for(memory, disk, swapping)?;
        let image_id = self
            .catalog
            .image_for(&profile.cpe, self.request.managed)
            .map(|id| id.to_string());
        if image_id.is_none() && !self.request.resume {
            return Err(Error::NoImage {
                vendor: profile.cpe.vendor.clone(),
                version: profile.cpe.version.clone(),
            });
        }
        Ok(Recommendation { flavor, image_id })
    }

    /// Create the destination through the provisioner and wait for it.
    async fn provision(
        &self,
        profile: &Profile,
        recommendation: &Recommendation,
    ) -> Result<HostEndpoint> {
        let provisioner = self
            .provisioner
            .as_ref()
            .ok_or_else(|| Error::ConfigError("no provisioner configured".to_string()))?;
        let image_id = recommendation
            .image_id
            .clone()
            .ok_or_else(|| Error::NoImage {
                vendor: profile.cpe.vendor.clone(),
                version: profile.cpe.version.clone(),
            })?;

        let name = self
            .request
            .instance_name
            .clone()
            .unwrap_or_else(|| self.request.source.hostname.clone());
        self.progress.phase("Provisioning destination");
        let host = provisioner
            .create_instance(&ProvisionRequest {
                image_id,
                flavor_id: recommendation.flavor.spec.id.to_string(),
                name,
                region: self.request.region.clone(),
            })
            .await?;
        provisioner.wait_until_ready(&host.id).await?;
        if self.request.managed {
            self.progress.status("Waiting for managed automation");
            provisioner
                .wait_until_managed_automation_done(&host.id)
                .await?;
        }
        Ok(host.endpoint)
    }

    /// Swap in rescue credentials when the request asks for rescue mode.
    async fn rescue_endpoint(&self, endpoint: HostEndpoint) -> Result<HostEndpoint> {
        if !self.request.rescue {
            return Ok(endpoint);
        }
        let provisioner = self
            .provisioner
            .as_ref()
            .ok_or_else(|| Error::ConfigError("rescue mode needs a provisioner".to_string()))?;
        let id = self
            .request
            .destination_instance_id
            .as_ref()
            .ok_or_else(|| Error::ConfigError("rescue mode needs an instance id".to_string()))?;
        self.progress.status("Entering rescue mode");
        let password = provisioner.rescue_mode(id).await?;
        Ok(HostEndpoint::root_with_password(
            endpoint.hostname.clone(),
            password,
        )
        .with_port(endpoint.port))
    }

    /// Profile the destination and rewrite source addresses, honoring any
    /// operator overrides.
    async fn remediate(&self, source_profile: &Profile, destination: &Session) -> Result<()> {
        let rewrites: Vec<IpRewrite> = match &self.request.ip_rewrites {
            Some(overrides) => overrides
                .iter()
                .map(|(src, dst)| IpRewrite {
                    source: src.clone(),
                    replacement: dst.clone(),
                })
                .collect(),
            None => {
                let dest_profile = HostProfiler::new(destination.clone()).run().await?;
                pair_addresses(source_profile, &dest_profile)
            }
        };
        if rewrites.is_empty() {
            info!("No IP rewrites needed");
            return Ok(());
        }
        let target_dirs = self.request.target_dirs.clone().unwrap_or_default();
        IpRemediator::new(destination.clone(), rewrites, target_dirs)
            .run()
            .await
    }

    fn open_journal(&self) -> Option<Journal> {
        let path = self.request.journal_path.as_ref()?;
        match Journal::open(path) {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!("Journal unavailable: {}", e);
                None
            }
        }
    }

    /// Resume sanity check: warn when no prior journal backs the resume.
    fn check_resume_journal(&self) {
        let Some(path) = self.request.journal_path.as_ref() else {
            return;
        };
        match Journal::last_state(path) {
            Some(state) => info!("Resuming; prior run reached {:?}", state),
            None => warn!("Resume requested but no prior journal found at {:?}", path),
        }
    }

    fn transition(&self, ctx: &mut RunContext, to: MigrateState) {
        let from = ctx.state;
        ctx.state = to;
        info!("State: {:?} -> {:?}", from, to);
        self.journal_append(
            ctx,
            JournalRecord::Transition {
                from,
                to,
                timestamp: Utc::now(),
            },
        );
    }

    fn journal_append(&self, ctx: &mut RunContext, record: JournalRecord) {
        if let Some(journal) = ctx.journal.as_mut() {
            if let Err(e) = journal.append(&record) {
                warn!("Journal write failed: {}", e);
            }
        }
    }

    fn record_session_stats(&self, ctx: &mut RunContext) {
        let stats: Vec<(String, u64, u64)> = [&ctx.source, &ctx.destination]
            .into_iter()
            .flatten()
            .map(|session| {
                (
                    session.endpoint().hostname.clone(),
                    session.stats().commands(),
                    session.stats().reconnects(),
                )
            })
            .collect();
        for (host, commands, reconnects) in stats {
            self.journal_append(
                ctx,
                JournalRecord::SessionStats {
                    host,
                    commands,
                    reconnects,
                },
            );
        }
    }
}
