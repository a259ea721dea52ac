// src/profile/mod.rs

//! Host profiles
//!
//! A `Profile` is the structured result of probing one host: named
//! sections of ordered name/value entries, the platform CPE, and any
//! warnings raised along the way. Entries are never omitted; a probe that
//! came back empty contributes an empty value so two runs over identical
//! probe output produce identical profiles.

mod parse;
mod probes;

pub use parse::{
    parse_cpuinfo, parse_df, parse_free, parse_ifconfig, parse_iowait, parse_issue_distro,
    parse_listening, parse_release_id, parse_sar_memused, parse_uptime_load, MemoryFigures,
};
pub use probes::HostProfiler;

use crate::platform::Cpe;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// One probed fact
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub name: String,
    pub value: String,
}

/// An ordered group of entries
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub name: String,
    pub entries: Vec<Entry>,
}

/// Structured description of one host
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    sections: Vec<Section>,
    /// Platform identity; vendor is empty when undetermined
    pub cpe: Cpe,
    warnings: Vec<String>,
}

impl Profile {
    pub fn new(cpe: Cpe) -> Self {
        Self {
            sections: Vec::new(),
            cpe,
            warnings: Vec::new(),
        }
    }

    /// Append an entry, creating its section on first use. Section and
    /// entry order is insertion order.
    pub fn push_entry(
        &mut self,
        section: &str,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        let entry = Entry {
            name: name.into(),
            value: value.into(),
        };
        if let Some(s) = self.sections.iter_mut().find(|s| s.name == section) {
            s.entries.push(entry);
        } else {
            self.sections.push(Section {
                name: section.to_string(),
                entries: vec![entry],
            });
        }
    }

    /// Record a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Values of entries whose section and name match the given regexes.
    ///
    /// Downstream components pull figures out by pattern instead of
    /// depending on the profile's layout.
    pub fn select_entries(&self, section_pattern: &str, name_pattern: &str) -> Vec<String> {
        let section_re = match Regex::new(section_pattern) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        let name_re = match Regex::new(name_pattern) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        self.sections
            .iter()
            .filter(|s| section_re.is_match(&s.name))
            .flat_map(|s| s.entries.iter())
            .filter(|e| name_re.is_match(&e.name))
            .map(|e| e.value.clone())
            .collect()
    }

    /// First matching entry parsed as a number, ignoring unit suffixes
    pub fn select_numeric(&self, section_pattern: &str, name_pattern: &str) -> Option<f64> {
        self.select_entries(section_pattern, name_pattern)
            .iter()
            .find_map(|v| {
                let digits: String = v
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                digits.parse().ok()
            })
    }

    /// All IPv4 addresses recorded in the Network section
    pub fn addresses(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.select_entries("Network", "Public IPs|Private IPs") {
            for addr in value.split(',') {
                let addr = addr.trim();
                if !addr.is_empty() {
                    out.push(addr.to_string());
                }
            }
        }
        out
    }

    /// Public addresses only
    pub fn public_addresses(&self) -> Vec<String> {
        self.split_address_entry("Public IPs")
    }

    /// RFC1918 addresses only
    pub fn private_addresses(&self) -> Vec<String> {
        self.split_address_entry("Private IPs")
    }

    fn split_address_entry(&self, name: &str) -> Vec<String> {
        self.select_entries("Network", name)
            .iter()
            .flat_map(|v| v.split(','))
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "-- {} --", section.name)?;
            let width = section
                .entries
                .iter()
                .map(|e| e.name.len())
                .max()
                .unwrap_or(0);
            for entry in &section.entries {
                writeln!(f, "  {:width$}  {}", entry.name, entry.value)?;
            }
            writeln!(f)?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "-- Warnings --")?;
            for w in &self.warnings {
                writeln!(f, "  {}", w)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        let mut p = Profile::new(Cpe::new("o", "centos", "centos", "6.3"));
        p.push_entry("Memory", "Total (MiB)", "3953");
        p.push_entry("Memory", "Used (MiB)", "1274");
        p.push_entry("Network", "Public IPs", "192.0.2.7, 198.51.100.4");
        p.push_entry("Network", "Private IPs", "10.0.0.5");
        p.push_entry("Storage", "Used Disk (GB)", "41.3");
        p
    }

    #[test]
    fn test_select_entries_by_pattern() {
        let p = sample();
        assert_eq!(p.select_entries("Memory", "^Used"), vec!["1274"]);
        assert_eq!(p.select_entries("Mem", "Total"), vec!["3953"]);
        assert!(p.select_entries("Memory", "^Free").is_empty());
    }

    #[test]
    fn test_select_numeric_ignores_suffix() {
        let mut p = sample();
        p.push_entry("Load", "15 Minute Average", "0.31");
        assert_eq!(p.select_numeric("Load", "15 Minute"), Some(0.31));
        assert_eq!(p.select_numeric("Storage", "Used Disk"), Some(41.3));
    }

    #[test]
    fn test_address_partitions() {
        let p = sample();
        assert_eq!(p.public_addresses(), vec!["192.0.2.7", "198.51.100.4"]);
        assert_eq!(p.private_addresses(), vec!["10.0.0.5"]);
        assert_eq!(p.addresses().len(), 3);
    }

    #[test]
    fn test_entry_order_is_stable() {
        let p = sample();
        let mem = &p.sections()[0];
        assert_eq!(mem.entries[0].name, "Total (MiB)");
        assert_eq!(mem.entries[1].name, "Used (MiB)");
    }

    #[test]
    fn test_display_contains_sections_and_warnings() {
        let mut p = sample();
        p.warn("Swap is in use");
        let text = p.to_string();
        assert!(text.contains("-- Memory --"));
        assert!(text.contains("Swap is in use"));
    }
}
