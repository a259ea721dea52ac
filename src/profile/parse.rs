// src/profile/parse.rs

//! Parsers for probe command output
//!
//! Every function here is pure: text in, figures out. Probes feed them the
//! raw stdout captured over the session; malformed lines are skipped
//! rather than failed on, since profiling tolerates partial data.

use regex::Regex;
use std::net::Ipv4Addr;

/// Figures extracted from `free -m`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryFigures {
    pub total_mib: u64,
    pub used_mib: u64,
    pub swap_total_mib: u64,
    pub swap_used_mib: u64,
}

/// Parse `free -m`, handling both the classic layout (separate buffers and
/// cached columns) and the combined `buff/cache` layout.
pub fn parse_free(output: &str) -> Option<MemoryFigures> {
    let mut lines = output.lines();
    let header = lines.next()?.to_lowercase();
    let combined = header.contains("buff/cache");

    let mut total = 0u64;
    let mut used = 0u64;
    let mut swap_total = 0u64;
    let mut swap_used = 0u64;
    let mut saw_mem = false;

    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields[0].eq_ignore_ascii_case("mem:") && fields.len() >= 4 {
            let col = |i: usize| fields.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            total = col(1);
            let free = col(3);
            if combined {
                // total used free shared buff/cache available
                let buff_cache = col(5);
                used = total.saturating_sub(free).saturating_sub(buff_cache);
            } else {
                // total used free shared buffers cached
                let buffers = col(5);
                let cached = col(6);
                used = total
                    .saturating_sub(free)
                    .saturating_sub(buffers)
                    .saturating_sub(cached);
            }
            saw_mem = true;
        } else if fields[0].eq_ignore_ascii_case("swap:") && fields.len() >= 3 {
            swap_total = fields[1].parse().unwrap_or(0);
            swap_used = fields[2].parse().unwrap_or(0);
        }
    }

    if !saw_mem {
        return None;
    }
    Some(MemoryFigures {
        total_mib: total,
        used_mib: used,
        swap_total_mib: swap_total,
        swap_used_mib: swap_used,
    })
}

/// Sum the Used column of `df` rows that describe real storage: device
/// under `/dev/`, or block count above ten million KiB. Returns GB.
pub fn parse_df(output: &str) -> f64 {
    let mut used_kib: u64 = 0;
    for line in output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let device = fields[0];
        let blocks: u64 = fields[1].parse().unwrap_or(0);
        let used: u64 = fields[2].parse().unwrap_or(0);
        if device.starts_with("/dev/") || blocks > 10_000_000 {
            used_kib += used;
        }
    }
    used_kib as f64 / 1_000_000.0
}

/// Non-loopback IPv4 addresses from `ifconfig` output, split into
/// (public, rfc1918) partitions in order of appearance.
pub fn parse_ifconfig(output: &str) -> (Vec<Ipv4Addr>, Vec<Ipv4Addr>) {
    let re = Regex::new(r"inet\s+(?:addr:)?(\d+\.\d+\.\d+\.\d+)").expect("static regex");
    let mut public = Vec::new();
    let mut private = Vec::new();
    for cap in re.captures_iter(output) {
        let Ok(addr) = cap[1].parse::<Ipv4Addr>() else {
            continue;
        };
        if addr.is_loopback() {
            continue;
        }
        if addr.is_private() {
            if !private.contains(&addr) {
                private.push(addr);
            }
        } else if !public.contains(&addr) {
            public.push(addr);
        }
    }
    (public, private)
}

/// Load averages from `uptime` output: (1, 5, 15) minutes
pub fn parse_uptime_load(output: &str) -> Option<(f64, f64, f64)> {
    let idx = output.rfind("load average")?;
    let tail = &output[idx..];
    let values: Vec<f64> = tail
        .split(':')
        .nth(1)?
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect();
    if values.len() < 3 {
        return None;
    }
    Some((values[0], values[1], values[2]))
}

/// Unique listening `(address, port, process)` triples from
/// `netstat -tlnup` output. The process column may be absent for
/// unprivileged callers; those triples carry an empty process name.
pub fn parse_listening(output: &str) -> Vec<(String, u16, String)> {
    let mut triples: Vec<(String, u16, String)> = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let proto = fields[0];
        if !proto.starts_with("tcp") && !proto.starts_with("udp") {
            continue;
        }
        if proto.starts_with("tcp") && !line.contains("LISTEN") {
            continue;
        }
        let local = fields[3];
        let Some((addr, port)) = local.rsplit_once(':') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        let process = fields
            .iter()
            .rev()
            .find(|f| f.contains('/'))
            .and_then(|f| f.split('/').nth(1))
            .unwrap_or("")
            .to_string();
        let triple = (addr.to_string(), port, process);
        if !triples.contains(&triple) {
            triples.push(triple);
        }
    }
    triples
}

/// (model name, logical count, MHz) from `/proc/cpuinfo`
pub fn parse_cpuinfo(output: &str) -> (String, usize, String) {
    let mut model = String::new();
    let mut mhz = String::new();
    let mut count = 0usize;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "processor" => count += 1,
            "model name" if model.is_empty() => model = value.to_string(),
            "cpu MHz" if mhz.is_empty() => mhz = value.to_string(),
            _ => {}
        }
    }
    (model, count, mhz)
}

/// Distro names recognized in `/etc/issue`
const ISSUE_DISTROS: &[(&str, &str)] = &[
    ("arch", "arch"),
    ("centos", "centos"),
    ("debian", "debian"),
    ("gentoo", "gentoo"),
    ("scientific", "scientific"),
    ("suse", "suse"),
    ("ubuntu", "ubuntu"),
    ("red hat", "redhat"),
    ("redhat", "redhat"),
];

/// Vendor and raw version substring from `/etc/issue` content
pub fn parse_issue_distro(issue: &str) -> Option<(String, String)> {
    let lowered = issue.to_lowercase();
    let vendor = ISSUE_DISTROS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, vendor)| vendor.to_string())?;
    let version = Regex::new(r"[0-9][0-9.]*")
        .expect("static regex")
        .find(issue)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Some((vendor, version))
}

/// `ID=` and `VERSION_ID=` values from os-release style files
pub fn parse_release_id(content: &str) -> Option<(String, String)> {
    let mut id = None;
    let mut version = String::new();
    for line in content.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("ID=") {
            id = Some(v.trim_matches('"').to_lowercase());
        } else if let Some(v) = line.strip_prefix("VERSION_ID=") {
            version = v.trim_matches('"').to_string();
        }
    }
    id.map(|id| (id, version))
}

/// Average `%memused` from `sar -r` output
pub fn parse_sar_memused(output: &str) -> Option<f64> {
    let mut col = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if col.is_none() {
            if let Some(idx) = fields.iter().position(|f| *f == "%memused") {
                col = Some(idx);
            }
            continue;
        }
        if fields.first().is_some_and(|f| f.starts_with("Average")) {
            return fields.get(col?).and_then(|v| v.parse().ok());
        }
    }
    None
}

/// `%iowait` from `iostat` avg-cpu output
pub fn parse_iowait(output: &str) -> Option<f64> {
    let mut lines = output.lines();
    while let Some(line) = lines.next() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if let Some(idx) = fields.iter().position(|f| *f == "%iowait") {
            let values: Vec<&str> = lines.next()?.split_whitespace().collect();
            return values.get(idx).and_then(|v| v.parse().ok());
        }
    }
    None
}
