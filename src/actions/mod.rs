// src/actions/mod.rs

//! Layered platform actions
//!
//! Exclusion lists and cleanup plans share one composition rule: walk the
//! platform path `["unix", vendor, product+version]` and concatenate the
//! payload of every layer that exists, most general first. Unknown
//! vendors still get the base layer; missing intermediate layers are
//! skipped, never an error. Resolution is pure data lookup, so it is
//! deterministic for a given CPE.

mod cleanup;
mod exclusions;

pub use cleanup::{cleanup_for, CleanupPlan};
pub use exclusions::{exclusions_for, ExclusionList};

use crate::platform::Cpe;

/// The platform path for layer lookup, most general first
fn platform_path(cpe: &Cpe) -> Vec<String> {
    let mut path = vec!["unix".to_string()];
    if !cpe.vendor.is_empty() {
        path.push(cpe.vendor.clone());
        if !cpe.version.is_empty() {
            path.push(format!("{}{}", cpe.product, cpe.version));
        }
    }
    path
}

/// Resolve the payloads along a platform path from a static layer table.
fn resolve_layers<T>(table: &'static [(&'static str, T)], cpe: &Cpe) -> Vec<&'static T> {
    platform_path(cpe)
        .iter()
        .filter_map(|key| {
            table
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, payload)| payload)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_path_layers() {
        let cpe = Cpe::new("o", "centos", "centos", "6.3");
        assert_eq!(platform_path(&cpe), vec!["unix", "centos", "centos6.3"]);

        let exact = Cpe::new("o", "centos", "centos", "6");
        assert_eq!(platform_path(&exact), vec!["unix", "centos", "centos6"]);
    }

    #[test]
    fn test_platform_path_unknown_vendor() {
        let cpe = Cpe::new("o", "", "", "");
        assert_eq!(platform_path(&cpe), vec!["unix"]);
    }

    #[test]
    fn test_platform_path_versionless() {
        let cpe = Cpe::new("o", "gentoo", "gentoo", "");
        assert_eq!(platform_path(&cpe), vec!["unix", "gentoo"]);
    }

    #[test]
    fn test_resolve_skips_missing_layers() {
        static TABLE: &[(&str, &str)] = &[("unix", "base"), ("debian6", "six")];
        let cpe = Cpe::new("o", "debian", "debian", "6");
        let layers = resolve_layers(TABLE, &cpe);
        assert_eq!(layers, vec![&"base", &"six"]);

        // A different minor release resolves only the layers that exist
        // for its exact version.
        let other = Cpe::new("o", "debian", "debian", "6.0");
        assert_eq!(resolve_layers(TABLE, &other), vec![&"base"]);
    }
}
