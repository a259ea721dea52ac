// src/remediate/mod.rs

//! Source IP remediation on the migrated root
//!
//! A migrated configuration tree still references the source's addresses.
//! The remediator pairs every source address with a destination address of
//! the same class where possible and rewrites references file by file
//! under the operator-approved target directories. Execution is
//! best-effort: a directory that fails to rewrite is logged and skipped.

use crate::error::Result;
use crate::paths::MOUNT_POINT;
use crate::profile::Profile;
use crate::shell::{Session, PACKAGE_TIMEOUT};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Directories rewritten when the operator does not override the list
pub const DEFAULT_TARGET_DIRS: &[&str] = &["/etc"];

/// One planned address rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRewrite {
    pub source: String,
    pub replacement: String,
}

/// Pair each source address (public first, then private) with a suggested
/// destination replacement: same RFC1918-ness when available, otherwise
/// the destination's first address.
pub fn pair_addresses(source: &Profile, destination: &Profile) -> Vec<IpRewrite> {
    let dest_public = destination.public_addresses();
    let dest_private = destination.private_addresses();
    let dest_first = dest_public
        .first()
        .or_else(|| dest_private.first())
        .cloned();

    let mut rewrites = Vec::new();
    let mut sources = source.public_addresses();
    sources.extend(source.private_addresses());

    for addr in sources {
        let private = addr
            .parse::<Ipv4Addr>()
            .map(|a| a.is_private())
            .unwrap_or(false);
        let matching = if private {
            dest_private.first()
        } else {
            dest_public.first()
        };
        let Some(replacement) = matching.cloned().or_else(|| dest_first.clone()) else {
            continue;
        };
        if replacement != addr {
            rewrites.push(IpRewrite {
                source: addr,
                replacement,
            });
        }
    }
    rewrites
}

/// Applies a rewrite plan to the mounted destination root
pub struct IpRemediator {
    destination: Session,
    rewrites: Vec<IpRewrite>,
    target_dirs: Vec<String>,
}

impl IpRemediator {
    /// The engine takes whatever final sequences it is handed; the CLI
    /// owns any operator editing of the plan and directory list.
    pub fn new(destination: Session, rewrites: Vec<IpRewrite>, target_dirs: Vec<String>) -> Self {
        let target_dirs = if target_dirs.is_empty() {
            DEFAULT_TARGET_DIRS.iter().map(|d| d.to_string()).collect()
        } else {
            target_dirs
        };
        Self {
            destination,
            rewrites,
            target_dirs,
        }
    }

    pub fn rewrites(&self) -> &[IpRewrite] {
        &self.rewrites
    }

    /// Rewrite every reference under every target directory.
    pub async fn run(&self) -> Result<()> {
        self.destination.set_phase("remediate").await;
        for dir in &self.target_dirs {
            for rewrite in &self.rewrites {
                let command = format!(
                    "find {MOUNT_POINT}{dir} -type f -exec sed -i 's/{src}/{dst}/g' {{}} \\;",
                    src = sed_escape(&rewrite.source),
                    dst = rewrite.replacement,
                );
                match self
                    .destination
                    .as_root(&command, PACKAGE_TIMEOUT, false)
                    .await
                {
                    Ok(_) => debug!(
                        "Rewrote {} -> {} under {}",
                        rewrite.source, rewrite.replacement, dir
                    ),
                    Err(e) => warn!(
                        "Rewrite {} -> {} under {} failed, continuing: {}",
                        rewrite.source, rewrite.replacement, dir, e
                    ),
                }
            }
        }
        Ok(())
    }
}

/// Escape an address for use as a sed pattern; dots must not match
/// arbitrary characters.
fn sed_escape(addr: &str) -> String {
    addr.replace('.', "\\.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Cpe;

    fn profile(public: &str, private: &str) -> Profile {
        let mut p = Profile::new(Cpe::new("o", "centos", "centos", "6"));
        p.push_entry("Network", "Public IPs", public);
        p.push_entry("Network", "Private IPs", private);
        p
    }

    #[test]
    fn test_pairing_prefers_matching_class() {
        let src = profile("192.0.2.7", "10.0.0.5");
        let dst = profile("198.51.100.4", "10.1.1.9");
        let rewrites = pair_addresses(&src, &dst);
        assert_eq!(
            rewrites,
            vec![
                IpRewrite {
                    source: "192.0.2.7".to_string(),
                    replacement: "198.51.100.4".to_string()
                },
                IpRewrite {
                    source: "10.0.0.5".to_string(),
                    replacement: "10.1.1.9".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_pairing_falls_back_to_first_destination_address() {
        let src = profile("192.0.2.7", "10.0.0.5");
        let dst = profile("198.51.100.4", "");
        let rewrites = pair_addresses(&src, &dst);
        // No private destination exists; the private source address falls
        // back to the first destination address.
        assert_eq!(rewrites[1].replacement, "198.51.100.4");
    }

    #[test]
    fn test_replacements_come_from_destination_profile() {
        let src = profile("192.0.2.7, 203.0.113.2", "10.0.0.5");
        let dst = profile("198.51.100.4", "10.1.1.9");
        let dest_addrs = dst.addresses();
        for rewrite in pair_addresses(&src, &dst) {
            assert!(dest_addrs.contains(&rewrite.replacement));
        }
    }

    #[test]
    fn test_identical_addresses_not_rewritten() {
        let src = profile("192.0.2.7", "");
        let dst = profile("192.0.2.7", "");
        assert!(pair_addresses(&src, &dst).is_empty());
    }

    #[test]
    fn test_sed_escape() {
        assert_eq!(sed_escape("10.0.0.5"), "10\\.0\\.0\\.5");
    }
}
