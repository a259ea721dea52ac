// src/watchdog/mod.rs

//! Health watchdogs
//!
//! A watchdog polls one command over a borrowed session on a fixed
//! interval, reduces the output to a scalar through its transform, and
//! fires the reactions of every alarm whose predicate holds. Reactions
//! run inline with the poll and must stay cheap; cancelling a worker
//! token is the intended use.
//!
//! `stop` is idempotent and drops the session reference without closing
//! the session; watchdogs never own their session.

use crate::profile::{parse_free, parse_uptime_load};
use crate::shell::{Session, PROBE_TIMEOUT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Reduce raw command output to the watchdog's scalar state
pub type Transform = fn(&str) -> Option<f64>;

/// Alarm condition over the scalar state
pub type Predicate = Box<dyn Fn(f64) -> bool + Send + Sync>;

/// Fired for each triggered alarm at each poll
pub type Reaction = Box<dyn Fn() + Send + Sync>;

struct AlarmSlot {
    name: String,
    predicate: Predicate,
    reactions: Vec<Reaction>,
}

struct Inner {
    name: String,
    session: Mutex<Option<Session>>,
    command: String,
    interval: Duration,
    transform: Transform,
    alarms: Mutex<Vec<AlarmSlot>>,
    state: Mutex<Option<f64>>,
    triggered: Mutex<Vec<String>>,
    stopped: AtomicBool,
}

/// One named health watchdog
pub struct Watchdog {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Create and start a watchdog. Polling begins immediately; alarms
    /// added later take effect from the next poll.
    pub fn create(
        name: impl Into<String>,
        session: Session,
        command: impl Into<String>,
        interval: Duration,
        transform: Transform,
    ) -> Self {
        let inner = Arc::new(Inner {
            name: name.into(),
            session: Mutex::new(Some(session)),
            command: command.into(),
            interval,
            transform,
            alarms: Mutex::new(Vec::new()),
            state: Mutex::new(None),
            triggered: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });

        let poll_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            poll_loop(poll_inner).await;
        });

        Self {
            inner,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register an alarm condition
    pub fn add_alarm(&self, name: impl Into<String>, predicate: Predicate) {
        self.inner.alarms.lock().unwrap().push(AlarmSlot {
            name: name.into(),
            predicate,
            reactions: Vec::new(),
        });
    }

    /// Attach a reaction to an alarm by name
    pub fn on_alarm(&self, name: &str, reaction: Reaction) {
        let mut alarms = self.inner.alarms.lock().unwrap();
        if let Some(slot) = alarms.iter_mut().find(|a| a.name == name) {
            slot.reactions.push(reaction);
        } else {
            warn!(
                "Watchdog {} has no alarm named {}; reaction dropped",
                self.inner.name, name
            );
        }
    }

    /// The most recent scalar state, if a poll has completed
    pub fn state(&self) -> Option<f64> {
        *self.inner.state.lock().unwrap()
    }

    /// Names of alarms triggered at the most recent poll
    pub fn triggered(&self) -> Vec<String> {
        self.inner.triggered.lock().unwrap().clone()
    }

    /// Stop polling and drop the session reference. Idempotent; never
    /// closes the session.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.session.lock().unwrap().take();
        debug!("Watchdog {} stopped", self.inner.name);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        let Some(session) = inner.session.lock().unwrap().clone() else {
            break;
        };
        let output = match session.query(&inner.command, PROBE_TIMEOUT, true).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Watchdog {} poll failed: {}", inner.name, e);
                continue;
            }
        };
        let Some(value) = (inner.transform)(&output) else {
            debug!("Watchdog {} could not reduce poll output", inner.name);
            continue;
        };
        *inner.state.lock().unwrap() = Some(value);

        let mut fired = Vec::new();
        {
            let alarms = inner.alarms.lock().unwrap();
            for slot in alarms.iter() {
                if (slot.predicate)(value) {
                    fired.push(slot.name.clone());
                    for reaction in &slot.reactions {
                        reaction();
                    }
                }
            }
        }
        if !fired.is_empty() {
            warn!(
                "Watchdog {} alarms triggered: {:?} (state {:.3})",
                inner.name, fired, value
            );
        }
        *inner.triggered.lock().unwrap() = fired;
    }
}

/// Name of the default alarm the canonical watchdogs install
pub const DEFAULT_ALARM: &str = "critical";

/// Disk capacity watchdog: `used/total` across real `df` rows, alarmed
/// above 95 percent.
pub fn used_space(session: Session, interval: Duration) -> Watchdog {
    let dog = Watchdog::create("used_space", session, "df", interval, df_ratio);
    dog.add_alarm(DEFAULT_ALARM, Box::new(|v| v > 0.95));
    dog
}

/// Load watchdog: fifteen-minute average from `uptime`, alarmed above 10.
pub fn system_load(session: Session, interval: Duration) -> Watchdog {
    let dog = Watchdog::create("system_load", session, "uptime", interval, load_fifteen);
    dog.add_alarm(DEFAULT_ALARM, Box::new(|v| v > 10.0));
    dog
}

/// Swap pressure watchdog: `swap_used/swap_total` from `free`, alarmed
/// above 25 percent.
pub fn utilized_memory(session: Session, interval: Duration) -> Watchdog {
    let dog = Watchdog::create("utilized_memory", session, "free -m", interval, swap_ratio);
    dog.add_alarm(DEFAULT_ALARM, Box::new(|v| v > 0.25));
    dog
}

/// used/total ratio over `df` rows describing real storage
fn df_ratio(output: &str) -> Option<f64> {
    let mut blocks: u64 = 0;
    let mut used: u64 = 0;
    for line in output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let row_blocks: u64 = fields[1].parse().unwrap_or(0);
        let row_used: u64 = fields[2].parse().unwrap_or(0);
        if fields[0].starts_with("/dev/") || row_blocks > 10_000_000 {
            blocks += row_blocks;
            used += row_used;
        }
    }
    if blocks == 0 {
        return None;
    }
    Some(used as f64 / blocks as f64)
}

fn load_fifteen(output: &str) -> Option<f64> {
    parse_uptime_load(output).map(|(_, _, fifteen)| fifteen)
}

fn swap_ratio(output: &str) -> Option<f64> {
    let figures = parse_free(output)?;
    if figures.swap_total_mib == 0 {
        return Some(0.0);
    }
    Some(figures.swap_used_mib as f64 / figures.swap_total_mib as f64)
}
