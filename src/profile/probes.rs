// src/profile/probes.rs

//! Probe registry and profiling driver
//!
//! Probes run strictly in the order of the `PROBES` table, one host per
//! run, so identical probe output always yields an identical profile. A
//! probe never aborts profiling: failed or empty command output becomes an
//! empty entry value plus a warning where the figure matters.

use crate::platform::{normalize_version, Cpe};
use crate::profile::{parse, Profile};
use crate::shell::{Session, PROBE_TIMEOUT};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
type ProbeFn = for<'a> fn(&'a Session, &'a mut Profile) -> ProbeFuture<'a>;

/// One registered probe
pub struct Probe {
    pub name: &'static str,
    run: ProbeFn,
}

/// The fixed probe order. Adding a probe means adding a row here.
pub static PROBES: &[Probe] = &[
    Probe { name: "system", run: |s, p| Box::pin(probe_system(s, p)) },
    Probe { name: "cpu", run: |s, p| Box::pin(probe_cpu(s, p)) },
    Probe { name: "memory", run: |s, p| Box::pin(probe_memory(s, p)) },
    Probe { name: "load", run: |s, p| Box::pin(probe_load(s, p)) },
    Probe { name: "storage", run: |s, p| Box::pin(probe_storage(s, p)) },
    Probe { name: "network", run: |s, p| Box::pin(probe_network(s, p)) },
    Probe { name: "libraries", run: |s, p| Box::pin(probe_libraries(s, p)) },
    Probe { name: "services", run: |s, p| Box::pin(probe_services(s, p)) },
];

/// Profiles one host over a single session
pub struct HostProfiler {
    session: Session,
}

impl HostProfiler {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Derive the platform CPE, then run every registered probe in order.
    pub async fn run(&self) -> crate::Result<Profile> {
        self.session.set_phase("profile").await;
        let cpe = derive_cpe(&self.session).await;
        let mut profile = Profile::new(cpe);
        if profile.cpe.is_unknown() {
            profile.warn("Unable to determine platform");
        }

        for probe in PROBES {
            debug!("Running probe: {}", probe.name);
            (probe.run)(&self.session, &mut profile).await;
        }
        Ok(profile)
    }
}

/// Run a probe command, treating any failure as empty output.
async fn probe_query(session: &Session, command: &str) -> String {
    session
        .query(command, PROBE_TIMEOUT, true)
        .await
        .unwrap_or_default()
}

/// Platform identity, by ordered fallback:
/// 1. `/etc/system-release-cpe` parsed as CPE 2.2
/// 2. a recognized distro name in `/etc/issue`
/// 3. `ID=` lines in `/etc/*[_-]release` / `/etc/*version`
/// 4. `uname -o` vendor with `uname -r` version
pub async fn derive_cpe(session: &Session) -> Cpe {
    let raw = probe_query(session, "cat /etc/system-release-cpe 2>/dev/null").await;
    if let Some(cpe) = Cpe::parse(&raw) {
        if !cpe.is_unknown() {
            return cpe;
        }
    }

    let issue = probe_query(session, "cat /etc/issue 2>/dev/null").await;
    if let Some((vendor, version)) = parse::parse_issue_distro(&issue) {
        return Cpe::new("o", vendor.clone(), vendor, &version);
    }

    let releases =
        probe_query(session, "cat /etc/*[_-]release /etc/*version 2>/dev/null").await;
    if let Some((id, version)) = parse::parse_release_id(&releases) {
        return Cpe::new("o", id.clone(), id, &version);
    }

    let vendor = probe_query(session, "uname -o").await.to_lowercase();
    let version = probe_query(session, "uname -r").await;
    Cpe::new("o", vendor.clone(), vendor, &normalize_version(&version))
}

async fn probe_system(session: &Session, profile: &mut Profile) {
    let hostname = session.hostname().await.unwrap_or_default();
    profile.push_entry("System", "Hostname", hostname);

    let os = if profile.cpe.is_unknown() {
        String::new()
    } else {
        format!("{} {}", profile.cpe.vendor, profile.cpe.version)
            .trim()
            .to_string()
    };
    profile.push_entry("System", "Operating System", os);

    let kernel = probe_query(session, "uname -r").await;
    profile.push_entry("System", "Kernel", kernel);

    let arch = probe_query(session, "uname -m").await;
    profile.push_entry("System", "Architecture", arch);

    let uptime = probe_query(session, "uptime").await;
    profile.push_entry("System", "Uptime", uptime.lines().next().unwrap_or("").trim());
}

async fn probe_cpu(session: &Session, profile: &mut Profile) {
    let cpuinfo = probe_query(session, "cat /proc/cpuinfo").await;
    let (model, count, mhz) = parse::parse_cpuinfo(&cpuinfo);
    if model.is_empty() {
        profile.warn("CPU model could not be determined");
    }
    profile.push_entry("CPU", "Model", model);
    let count = if count == 0 {
        String::new()
    } else {
        count.to_string()
    };
    profile.push_entry("CPU", "Count", count);
    profile.push_entry("CPU", "Speed (MHz)", mhz);
}

async fn probe_memory(session: &Session, profile: &mut Profile) {
    let free = probe_query(session, "free -m").await;
    match parse::parse_free(&free) {
        Some(m) => {
            profile.push_entry("Memory", "Total (MiB)", m.total_mib.to_string());
            profile.push_entry("Memory", "Used (MiB)", m.used_mib.to_string());
            profile.push_entry("Memory", "Swap Total (MiB)", m.swap_total_mib.to_string());
            profile.push_entry("Memory", "Swap Used (MiB)", m.swap_used_mib.to_string());
            if m.swap_used_mib > 0 {
                profile.warn("Swap is in use");
            }
        }
        None => {
            profile.push_entry("Memory", "Total (MiB)", "");
            profile.push_entry("Memory", "Used (MiB)", "");
            profile.push_entry("Memory", "Swap Total (MiB)", "");
            profile.push_entry("Memory", "Swap Used (MiB)", "");
            profile.warn("Memory figures could not be determined");
        }
    }

    // Historical usage only where sysstat keeps sa files around.
    let has_sar = !probe_query(session, "which sar 2>/dev/null").await.is_empty();
    let historical = if has_sar {
        let mut samples = Vec::new();
        let listing = probe_query(session, "ls /var/log/sa/sa?? 2>/dev/null").await;
        for file in listing.split_whitespace() {
            let out = probe_query(session, &format!("sar -r -f {}", file)).await;
            if let Some(pct) = parse::parse_sar_memused(&out) {
                samples.push(pct);
            }
        }
        if samples.is_empty() {
            String::new()
        } else {
            format!("{:.1}", samples.iter().sum::<f64>() / samples.len() as f64)
        }
    } else {
        String::new()
    };
    profile.push_entry("Memory", "Historical Use (%)", historical);
}

async fn probe_load(session: &Session, profile: &mut Profile) {
    let uptime = probe_query(session, "uptime").await;
    match parse::parse_uptime_load(&uptime) {
        Some((one, five, fifteen)) => {
            profile.push_entry("Load", "1 Minute Average", format!("{:.2}", one));
            profile.push_entry("Load", "5 Minute Average", format!("{:.2}", five));
            profile.push_entry("Load", "15 Minute Average", format!("{:.2}", fifteen));
            if fifteen > 10.0 {
                profile.warn("Load is heavy");
            }
        }
        None => {
            profile.push_entry("Load", "1 Minute Average", "");
            profile.push_entry("Load", "5 Minute Average", "");
            profile.push_entry("Load", "15 Minute Average", "");
            profile.warn("Load averages could not be determined");
        }
    }

    let iostat = probe_query(session, "iostat 2>/dev/null").await;
    match parse::parse_iowait(&iostat) {
        Some(wait) => {
            profile.push_entry("Load", "IO Wait (%)", format!("{:.1}", wait));
            if wait > 10.0 {
                profile.warn("IO wait is high");
            }
        }
        None => profile.push_entry("Load", "IO Wait (%)", ""),
    }
}

async fn probe_storage(session: &Session, profile: &mut Profile) {
    let df = probe_query(session, "df").await;
    if df.is_empty() {
        profile.push_entry("Storage", "Used Disk (GB)", "");
        profile.warn("Disk usage could not be determined");
        return;
    }
    profile.push_entry("Storage", "Used Disk (GB)", format!("{:.1}", parse::parse_df(&df)));
}

async fn probe_network(session: &Session, profile: &mut Profile) {
    let ifconfig =
        probe_query(session, "/sbin/ifconfig -a 2>/dev/null || ifconfig -a").await;
    let (public, private) = parse::parse_ifconfig(&ifconfig);
    if public.is_empty() && private.is_empty() {
        profile.warn("No non-loopback IPv4 addresses found");
    }
    let join = |addrs: &[std::net::Ipv4Addr]| {
        addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    profile.push_entry("Network", "Public IPs", join(&public));
    profile.push_entry("Network", "Private IPs", join(&private));
}

async fn probe_libraries(session: &Session, profile: &mut Profile) {
    let ldd = probe_query(session, "ldd --version 2>/dev/null").await;
    profile.push_entry("Libraries", "LibC", ldd.lines().next().unwrap_or("").trim());

    let openssl = probe_query(session, "openssl version 2>/dev/null").await;
    profile.push_entry("Libraries", "OpenSSL", openssl.lines().next().unwrap_or("").trim());
}

async fn probe_services(session: &Session, profile: &mut Profile) {
    let netstat = probe_query(session, "netstat -tlnup 2>/dev/null").await;
    let triples = parse::parse_listening(&netstat);
    if triples.is_empty() {
        profile.push_entry("Services", "Listening", "");
    }
    for (addr, port, process) in triples {
        profile.push_entry("Services", format!("{}:{}", addr, port), process);
    }

    let ps = probe_query(session, "ps aux 2>/dev/null || ps -ef").await;
    if ps.lines().any(|l| l.contains("psa")) {
        profile.warn("Control panel detected: likely Plesk");
    }
    if ps.lines().any(|l| l.contains("cpanel")) {
        profile.warn("Control panel detected: likely cPanel");
    }
}
