// src/cleanup/mod.rs

//! Post-migration cleanup execution
//!
//! Stages the three cleanup phase scripts on the destination, runs them in
//! strict pre / chroot / post order, then restores the auxiliary support
//! users from the credential backups taken during destination prep.
//! Phases are best-effort: a failed step is logged and the runner moves
//! on, because a partially cleaned destination still beats an unbootable
//! one.
//!
//! All phase commands run without a deadline; chroot work (initrd
//! rebuilds, package cache surgery) can legitimately take a long time.

use crate::actions::{cleanup_for, CleanupPlan};
use crate::error::Result;
use crate::paths::{BACKUP_SUFFIX, DATA_DIR, MOUNT_POINT};
use crate::platform::Cpe;
use crate::shell::{Session, PROBE_TIMEOUT, UNLIMITED};
use tracing::{debug, info, warn};

/// Support users recreated on the destination when the backups held them
const AUXILIARY_USERS: &[&str] = &["rack", "rackconnect"];

/// Executes a cleanup plan against a mounted destination root
pub struct CleanupRunner {
    destination: Session,
    cpe: Cpe,
}

impl CleanupRunner {
    pub fn new(destination: Session, cpe: Cpe) -> Self {
        Self { destination, cpe }
    }

    /// Build the platform plan, stage the scripts, and run all phases.
    pub async fn run(&self) -> Result<()> {
        self.destination.set_phase("cleanup").await;
        let plan = cleanup_for(&self.cpe);
        self.stage_scripts(&plan).await?;

        self.run_phase("pre", &format!("/bin/sh {DATA_DIR}/pre.sh"))
            .await;
        self.run_phase(
            "chroot",
            &format!("chroot {MOUNT_POINT} /bin/sh -C {DATA_DIR}/chroot.sh"),
        )
        .await;
        self.run_phase("post", &format!("/bin/sh {DATA_DIR}/post.sh"))
            .await;

        self.restore_auxiliary_users().await;
        Ok(())
    }

    /// Write the three phase scripts where their phases expect them: pre
    /// and post under the host data dir, chroot under the mounted root so
    /// the chroot can see it.
    async fn stage_scripts(&self, plan: &CleanupPlan) -> Result<()> {
        self.destination
            .as_root(
                &format!("mkdir -p {DATA_DIR} {MOUNT_POINT}{DATA_DIR}"),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        self.write_script(&format!("{DATA_DIR}/pre.sh"), &plan.pre_script())
            .await?;
        self.write_script(
            &format!("{MOUNT_POINT}{DATA_DIR}/chroot.sh"),
            &plan.chroot_script(),
        )
        .await?;
        self.write_script(&format!("{DATA_DIR}/post.sh"), &plan.post_script())
            .await?;
        Ok(())
    }

    async fn write_script(&self, path: &str, body: &str) -> Result<()> {
        let escaped = body.replace('\n', "\\n");
        self.destination
            .as_root(
                &format!("printf '{escaped}' > {path} && chmod 0755 {path}"),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        debug!("Staged cleanup script {}", path);
        Ok(())
    }

    /// Run one phase without a deadline; log and continue on failure.
    async fn run_phase(&self, name: &str, command: &str) {
        info!("Cleanup phase: {}", name);
        let marked = format!("{command} && echo FLOCK_PHASE_OK || echo FLOCK_PHASE_ERR");
        match self.destination.as_root(&marked, UNLIMITED, false).await {
            Ok(output) if output.contains("FLOCK_PHASE_OK") => {
                debug!("Cleanup phase {} complete", name);
            }
            Ok(output) => {
                warn!(
                    "Cleanup phase {} failed, continuing: {}",
                    name,
                    output.lines().last().unwrap_or("")
                );
            }
            Err(e) => {
                warn!("Cleanup phase {} errored, continuing: {}", name, e);
            }
        }
    }

    /// Recreate the auxiliary users present in the backed-up passwd file,
    /// carry their original password hashes into the new shadow file, and
    /// grant them passwordless sudo.
    async fn restore_auxiliary_users(&self) {
        for user in AUXILIARY_USERS {
            match self.restore_user(user).await {
                Ok(true) => info!("Restored auxiliary user {}", user),
                Ok(false) => debug!("Auxiliary user {} not present in backups", user),
                Err(e) => warn!("Could not restore auxiliary user {}: {}", user, e),
            }
        }
    }

    async fn restore_user(&self, user: &str) -> Result<bool> {
        let dest = &self.destination;
        let in_backup = dest
            .as_root(
                &format!(
                    "grep '^{user}:' {MOUNT_POINT}/etc/passwd.{BACKUP_SUFFIX} 2>/dev/null"
                ),
                PROBE_TIMEOUT,
                true,
            )
            .await?;
        if in_backup.trim().is_empty() {
            return Ok(false);
        }

        let hash = dest
            .as_root(
                &format!(
                    "grep '^{user}:' {MOUNT_POINT}/etc/shadow.{BACKUP_SUFFIX} 2>/dev/null | cut -d: -f2"
                ),
                PROBE_TIMEOUT,
                true,
            )
            .await?;
        let hash = hash.trim();

        dest.as_root(
            &format!("chroot {MOUNT_POINT} useradd -m {user} 2>/dev/null || true"),
            PROBE_TIMEOUT,
            false,
        )
        .await?;

        if !hash.is_empty() {
            dest.as_root(
                &format!(
                    "sed -i 's|^{user}:[^:]*:|{user}:{hash}:|' {MOUNT_POINT}/etc/shadow"
                ),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        }

        dest.as_root(
            &format!("chroot {MOUNT_POINT} chown -R {user}:{user} /home/{user} 2>/dev/null || true"),
            PROBE_TIMEOUT,
            false,
        )
        .await?;

        let stanza = format!("{user} ALL=(ALL) NOPASSWD: ALL");
        dest.as_root(
            &format!(
                "grep -q '^{user} ALL' {MOUNT_POINT}/etc/sudoers 2>/dev/null || \
                 echo '{stanza}' >> {MOUNT_POINT}/etc/sudoers"
            ),
            PROBE_TIMEOUT,
            false,
        )
        .await?;

        Ok(true)
    }
}
