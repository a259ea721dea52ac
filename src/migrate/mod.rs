// src/migrate/mod.rs

//! Two-pass filesystem migration
//!
//! The engine drives the transfer between one source and one destination
//! session, both root-equivalent. Order matters throughout: the keypair
//! exists before destination prep installs it, destination prep completes
//! before the source ever dials the destination, source prep completes
//! before any rsync is issued, and both rsync passes complete before the
//! caller may run cleanup.
//!
//! Health watchdogs supervise both endpoints over their own monitor
//! sessions. An alarm cancels the in-flight pass; the engine unwinds to
//! the health gate and starts the pass cycle over, leaning on rsync's
//! partial-transfer resume.

use crate::actions::ExclusionList;
use crate::error::{Error, Result};
use crate::paths::{
    BACKUP_SUFFIX, DATA_DIR, DEFAULT_BLOCK_DEVICE, EXCLUSIONS_FILE, MOUNT_POINT, PRIVATE_KEY,
    PUBLIC_KEY,
};
use crate::progress::ProgressSink;
use crate::shell::{
    ssh_option_args, Session, LONG_TIMEOUT, PACKAGE_TIMEOUT, PROBE_TIMEOUT, RSYNC_TIMEOUT,
};
use crate::watchdog::{self, Watchdog, DEFAULT_ALARM};
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watchdog polling cadence, also the health-gate recheck interval
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Attempts per rsync pass before the pass is declared failed
const RSYNC_ATTEMPTS: u32 = 3;

/// PTY tail shown to the operator when a pass fails for good
const FAILURE_TAIL_LINES: usize = 200;

/// Sessions the engine drives. The monitor sessions exist so watchdog
/// polls never queue behind a multi-hour rsync on the main sessions.
pub struct EngineSessions {
    pub source: Session,
    pub destination: Session,
    pub source_monitor: Session,
    pub destination_monitor: Session,
}

/// The two-pass migration engine
pub struct MigrationEngine {
    sessions: EngineSessions,
    exclusions: ExclusionList,
    block_device: String,
    progress: Arc<dyn ProgressSink>,
    /// rsync binary to invoke on the source; set during source prep
    rsync_path: Mutex<String>,
}

impl MigrationEngine {
    pub fn new(
        sessions: EngineSessions,
        exclusions: ExclusionList,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            sessions,
            exclusions,
            block_device: DEFAULT_BLOCK_DEVICE.to_string(),
            progress,
            rsync_path: Mutex::new("rsync".to_string()),
        }
    }

    /// Override the destination block device holding the target root
    pub fn with_block_device(mut self, device: impl Into<String>) -> Self {
        self.block_device = device.into();
        self
    }

    /// Run the full transfer. On success the mounted destination root
    /// holds a consistent snapshot minus exclusions; the sessions remain
    /// open for cleanup.
    pub async fn run(&self) -> Result<()> {
        self.sessions.source.set_phase("migrate").await;
        self.sessions.destination.set_phase("migrate").await;

        self.progress.phase("Preparing source keypair");
        let public_key = self.provision_keypair().await?;

        self.progress.phase("Preparing destination");
        self.prepare_destination(&public_key).await?;

        self.progress.phase("Preparing source");
        self.prepare_source().await?;

        self.progress.phase("Selecting target address");
        let target = self.select_target_address().await?;
        info!("Transfer target address: {}", target);

        // Stream transfer output live; verbose front-ends render it.
        let sink = Arc::clone(&self.progress);
        self.sessions
            .source
            .set_tap(Some(Arc::new(move |chunk: &str| sink.pty_output(chunk))));

        self.progress.phase("Watching endpoint health");
        let watchdogs = self.start_watchdogs();
        let cancel_cell = Arc::new(Mutex::new(CancellationToken::new()));
        for dog in &watchdogs {
            let cell = Arc::clone(&cancel_cell);
            dog.on_alarm(
                DEFAULT_ALARM,
                Box::new(move || cell.lock().unwrap().cancel()),
            );
        }

        let result = self.sync_until_done(&target, &watchdogs, &cancel_cell).await;

        for dog in &watchdogs {
            dog.stop();
        }
        self.sessions.source.set_tap(None);
        result
    }

    /// Step 1: 4096-bit RSA keypair under the source data dir; returns
    /// the public key line.
    async fn provision_keypair(&self) -> Result<String> {
        let source = &self.sessions.source;
        source
            .as_root(
                &format!("mkdir -p {DATA_DIR} && chmod 0700 {DATA_DIR}"),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        source
            .as_root(
                &format!(
                    "test -f {PRIVATE_KEY} || ssh-keygen -t rsa -b 4096 -N '' -q -f {PRIVATE_KEY}"
                ),
                LONG_TIMEOUT,
                false,
            )
            .await?;
        let public_key = source
            .as_root(&format!("cat {PUBLIC_KEY}"), PROBE_TIMEOUT, false)
            .await?;
        if !public_key.contains("ssh-rsa") {
            return Err(Error::IoError(format!(
                "keypair generation produced no public key: {}",
                public_key
            )));
        }
        Ok(public_key.trim().to_string())
    }

    /// Step 2: mount the target root, back up credential files, make sure
    /// rsync exists, and authorize the source key.
    async fn prepare_destination(&self, public_key: &str) -> Result<()> {
        let dest = &self.sessions.destination;

        dest.as_root(&format!("mkdir -p {MOUNT_POINT}"), PROBE_TIMEOUT, false)
            .await?;
        dest.as_root(
            &format!(
                "mount | grep -q ' {MOUNT_POINT} ' || mount -o acl {} {MOUNT_POINT}",
                self.block_device
            ),
            PACKAGE_TIMEOUT,
            false,
        )
        .await?;

        for file in ["passwd", "shadow", "group"] {
            dest.as_root(
                &format!(
                    "test -f {MOUNT_POINT}/etc/{file}.{BACKUP_SUFFIX} || \
                     cp -p {MOUNT_POINT}/etc/{file} {MOUNT_POINT}/etc/{file}.{BACKUP_SUFFIX}"
                ),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        }

        self.ensure_destination_rsync().await?;

        dest.as_root(
            &format!(
                "mkdir -p $HOME/.ssh && chmod 0700 $HOME/.ssh && \
                 grep -q '{key}' $HOME/.ssh/authorized_keys 2>/dev/null || \
                 echo '{key}' >> $HOME/.ssh/authorized_keys",
                key = public_key
            ),
            PROBE_TIMEOUT,
            false,
        )
        .await?;
        debug!("Destination prepared; source key authorized");
        Ok(())
    }

    /// Install rsync on the destination through whichever package manager
    /// is present.
    async fn ensure_destination_rsync(&self) -> Result<()> {
        let dest = &self.sessions.destination;
        let existing = dest
            .as_root("which rsync 2>/dev/null", PROBE_TIMEOUT, true)
            .await?;
        if !existing.trim().is_empty() {
            return Ok(());
        }

        let manager = dest
            .as_root("which yum apt-get 2>/dev/null", PROBE_TIMEOUT, true)
            .await?;
        let install = if manager.contains("yum") {
            "yum install -y rsync"
        } else if manager.contains("apt-get") {
            "apt-get install -y rsync"
        } else {
            return Err(Error::NoRsync {
                host: dest.endpoint().hostname.clone(),
                detail: "no yum or apt-get on destination".to_string(),
            });
        };
        dest.as_root(install, PACKAGE_TIMEOUT, false).await?;

        let check = dest
            .as_root("which rsync 2>/dev/null", PROBE_TIMEOUT, true)
            .await?;
        if check.trim().is_empty() {
            return Err(Error::NoRsync {
                host: dest.endpoint().hostname.clone(),
                detail: format!("install via `{}` left no rsync binary", install),
            });
        }
        Ok(())
    }

    /// Step 3: write the exclusions file and make sure the source can run
    /// rsync, vending the binary from the destination if it has to.
    async fn prepare_source(&self) -> Result<()> {
        let source = &self.sessions.source;

        let rendered = self.exclusions.render().replace('\n', "\\n");
        source
            .as_root(
                &format!("printf '{}\\n' > {EXCLUSIONS_FILE}", rendered),
                PROBE_TIMEOUT,
                false,
            )
            .await?;

        let existing = source
            .as_root("which rsync 2>/dev/null", PROBE_TIMEOUT, true)
            .await?;
        if !existing.trim().is_empty() {
            *self.rsync_path.lock().unwrap() = "rsync".to_string();
            return Ok(());
        }

        // Vend the binary from the destination over the migration key.
        warn!("Source has no rsync; copying the destination's binary");
        let dest_rsync = self
            .sessions
            .destination
            .as_root("which rsync", PROBE_TIMEOUT, false)
            .await?;
        let dest_rsync = dest_rsync.trim();
        let dest_login = self.sessions.destination.endpoint();
        source
            .as_root(
                &format!(
                    "scp {} -i {PRIVATE_KEY} {}@{}:{} {DATA_DIR}/rsync && chmod 0755 {DATA_DIR}/rsync",
                    ssh_option_args(),
                    dest_login.username,
                    dest_login.hostname,
                    dest_rsync
                ),
                PACKAGE_TIMEOUT,
                false,
            )
            .await?;

        let vended = source
            .as_root(
                &format!("test -x {DATA_DIR}/rsync && echo ok"),
                PROBE_TIMEOUT,
                true,
            )
            .await?;
        if !vended.contains("ok") {
            return Err(Error::NoRsync {
                host: source.endpoint().hostname.clone(),
                detail: "vended binary is not executable".to_string(),
            });
        }
        *self.rsync_path.lock().unwrap() = format!("{DATA_DIR}/rsync");
        Ok(())
    }

    /// Step 4: pick the destination address the source should dial.
    ///
    /// The destination knows its own host key fingerprint; the source
    /// scans each destination address and keeps the last one whose
    /// observed fingerprint matches. This lands on an internal service
    /// network when one exists without trusting address classes.
    async fn select_target_address(&self) -> Result<String> {
        let dest = &self.sessions.destination;
        let own = dest
            .as_root(
                "ssh-keygen -l -f /etc/ssh/ssh_host_rsa_key.pub",
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        let own_fingerprint = fingerprint_field(&own);

        let ifconfig = dest
            .as_root("/sbin/ifconfig -a 2>/dev/null || ifconfig -a", PROBE_TIMEOUT, true)
            .await?;
        let candidates = inet_addresses(&ifconfig);
        debug!("Destination addresses: {:?}", candidates);

        let mut selected = None;
        if let Some(own_fp) = own_fingerprint {
            for addr in &candidates {
                let scan = self
                    .sessions
                    .source
                    .as_root(
                        &format!(
                            "ssh-keyscan -t rsa -T 5 {addr} 2>/dev/null | ssh-keygen -l -f -"
                        ),
                        PROBE_TIMEOUT,
                        true,
                    )
                    .await?;
                match fingerprint_field(&scan) {
                    Some(seen) if seen == own_fp => {
                        debug!("Fingerprint match on {}", addr);
                        selected = Some(addr.clone());
                    }
                    Some(seen) => {
                        debug!("Fingerprint mismatch on {}: {}", addr, seen);
                    }
                    None => {
                        debug!("No handshake on {}", addr);
                    }
                }
            }
        }

        Ok(selected.unwrap_or_else(|| dest.endpoint().hostname.clone()))
    }

    /// Step 5 supervision set: load and swap on the source; load, swap,
    /// and disk capacity on the destination.
    fn start_watchdogs(&self) -> Vec<Watchdog> {
        let src = &self.sessions.source_monitor;
        let dst = &self.sessions.destination_monitor;
        vec![
            watchdog::system_load(src.clone(), HEALTH_INTERVAL),
            watchdog::utilized_memory(src.clone(), HEALTH_INTERVAL),
            watchdog::system_load(dst.clone(), HEALTH_INTERVAL),
            watchdog::utilized_memory(dst.clone(), HEALTH_INTERVAL),
            watchdog::used_space(dst.clone(), HEALTH_INTERVAL),
        ]
    }

    /// Steps 5-7: gate on health, run both passes, and start over when a
    /// watchdog cancels the worker.
    async fn sync_until_done(
        &self,
        target: &str,
        watchdogs: &[Watchdog],
        cancel_cell: &Arc<Mutex<CancellationToken>>,
    ) -> Result<()> {
        loop {
            self.await_healthy(watchdogs).await;

            // Fresh token per cycle; the previous one stays cancelled.
            let token = CancellationToken::new();
            *cancel_cell.lock().unwrap() = token.clone();

            match self.two_pass(target, &token).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled { .. }) => {
                    let alarms: Vec<String> = watchdogs
                        .iter()
                        .filter(|d| !d.triggered().is_empty())
                        .map(|d| d.name().to_string())
                        .collect();
                    warn!("Transfer cancelled by watchdogs {:?}; re-gating", alarms);
                    self.progress.status(&format!(
                        "Transfer paused by {:?}; waiting for health",
                        alarms
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Block until no watchdog reports a triggered alarm.
    async fn await_healthy(&self, watchdogs: &[Watchdog]) {
        loop {
            let triggered: Vec<&str> = watchdogs
                .iter()
                .filter(|d| !d.triggered().is_empty())
                .map(|d| d.name())
                .collect();
            if triggered.is_empty() {
                return;
            }
            info!("Holding for health: {:?}", triggered);
            tokio::time::sleep(HEALTH_INTERVAL).await;
        }
    }

    /// Step 6: the two sequential passes. Between passes, `/var/log` is
    /// dropped from the exclusions so the second pass carries the log
    /// delta accumulated during the first.
    async fn two_pass(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_pass(1, target, cancel).await?;
        self.sessions
            .source
            .as_root(
                &format!("sed -i 's|/var/log||g' {EXCLUSIONS_FILE}"),
                PROBE_TIMEOUT,
                false,
            )
            .await?;
        self.run_pass(2, target, cancel).await?;
        Ok(())
    }

    /// One rsync pass with its bounded retry budget.
    async fn run_pass(&self, pass: u32, target: &str, cancel: &CancellationToken) -> Result<()> {
        let rsync = self.rsync_path.lock().unwrap().clone();
        let user = &self.sessions.destination.endpoint().username;
        let command = format!(
            "{rsync} -azP -e 'ssh {opts} -i {PRIVATE_KEY}' --exclude-from={EXCLUSIONS_FILE} \
             / {user}@{target}:{MOUNT_POINT}",
            opts = ssh_option_args(),
        );

        let mut last_tail = String::new();
        for attempt in 1..=RSYNC_ATTEMPTS {
            self.progress.status(&format!(
                "rsync pass {} attempt {}/{}",
                pass, attempt, RSYNC_ATTEMPTS
            ));
            let marked = format!("{command} && echo FLOCK_RSYNC_OK || echo FLOCK_RSYNC_ERR");
            match self
                .sessions
                .source
                .as_root_cancellable(&marked, RSYNC_TIMEOUT, cancel)
                .await
            {
                Ok(output) => {
                    if output.contains("FLOCK_RSYNC_OK") {
                        info!("rsync pass {} complete", pass);
                        return Ok(());
                    }
                    last_tail = tail_lines(&output, FAILURE_TAIL_LINES);
                    warn!("rsync pass {} attempt {} exited nonzero", pass, attempt);
                }
                Err(Error::DeadlineExceeded { .. }) => {
                    warn!(
                        "rsync pass {} attempt {} hit the {}s deadline",
                        pass,
                        attempt,
                        RSYNC_TIMEOUT.as_secs()
                    );
                    last_tail = format!("pass {} timed out", pass);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RsyncFailed {
            pass,
            attempts: RSYNC_ATTEMPTS,
            tail: last_tail,
        })
    }
}

/// Second whitespace field of `ssh-keygen -l` output: the fingerprint
fn fingerprint_field(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.split_whitespace().nth(1))
        .map(|s| s.to_string())
}

/// All non-loopback IPv4 `inet` addresses in order of appearance
fn inet_addresses(output: &str) -> Vec<String> {
    let re = Regex::new(r"inet\s+(?:addr:)?(\d+\.\d+\.\d+\.\d+)").expect("static regex");
    let mut addrs = Vec::new();
    for cap in re.captures_iter(output) {
        let addr = cap[1].to_string();
        if addr.starts_with("127.") || addrs.contains(&addr) {
            continue;
        }
        addrs.push(addr);
    }
    addrs
}

/// The last `count` lines of a buffer
fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
