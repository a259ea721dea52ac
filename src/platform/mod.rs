// src/platform/mod.rs

//! Platform identity
//!
//! A `Cpe` names the operating platform of a host: part, vendor, product,
//! version, following the CPE 2.2 URI shape (`cpe:/o:centos:centos:6.5`).
//! The version is always normalized to digits and dots. `PlatformKey` is
//! the lookup tuple the catalogs and the layered platform actions use.

mod catalog;

pub use catalog::{
    Catalog, FlavorRecommendation, FlavorSpec, ImageMap, RecommendReason, CATALOG_V1, CATALOG_V2,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured platform identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpe {
    /// CPE part: `o` for operating systems
    pub part: String,
    /// Vendor, lowercase
    pub vendor: String,
    /// Product, lowercase
    pub product: String,
    /// Version, digits and dots only; empty when unknown
    pub version: String,
}

impl Cpe {
    /// Build a CPE, lowercasing vendor/product and normalizing the version
    pub fn new(
        part: impl Into<String>,
        vendor: impl Into<String>,
        product: impl Into<String>,
        version: &str,
    ) -> Self {
        let vendor = vendor.into().to_lowercase();
        let product = product.into().to_lowercase();
        Self {
            part: part.into(),
            vendor,
            product,
            version: normalize_version(version),
        }
    }

    /// Parse a CPE 2.2 URI such as `cpe:/o:centos:centos:6`
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.trim().strip_prefix("cpe:/")?;
        let mut fields = rest.split(':');
        let part = fields.next()?.to_string();
        let vendor = fields.next()?.to_string();
        let product = fields.next().unwrap_or("").to_string();
        let version = fields.next().unwrap_or("");
        if part.is_empty() || vendor.is_empty() {
            return None;
        }
        Some(Self::new(part, vendor, product, version))
    }

    /// True when the vendor could not be determined
    pub fn is_unknown(&self) -> bool {
        self.vendor.is_empty()
    }

    /// Lookup key: lowercase vendor plus exact version
    pub fn key(&self) -> PlatformKey {
        PlatformKey {
            vendor: self.vendor.clone(),
            version: self.version.clone(),
        }
    }

    /// Lookup key with the wildcard version
    pub fn wildcard_key(&self) -> PlatformKey {
        PlatformKey {
            vendor: self.vendor.clone(),
            version: "*".to_string(),
        }
    }

    /// Major version component, when present
    pub fn major_version(&self) -> Option<&str> {
        let major = self.version.split('.').next()?;
        if major.is_empty() {
            None
        } else {
            Some(major)
        }
    }
}

impl fmt::Display for Cpe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpe:/{}:{}:{}:{}",
            self.part, self.vendor, self.product, self.version
        )
    }
}

/// Catalog lookup tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformKey {
    pub vendor: String,
    pub version: String,
}

impl PlatformKey {
    pub fn new(vendor: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into().to_lowercase(),
            version: version.into(),
        }
    }
}

/// Strip a version string down to `[0-9.]+`
pub fn normalize_version(raw: &str) -> String {
    // Take the first digits-and-dots run rather than concatenating all of
    // them; "6.5 (Final)" must become "6.5", not "6.5".
    let re = Regex::new(r"[0-9][0-9.]*").expect("static regex");
    re.find(raw)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpe_uri() {
        let cpe = Cpe::parse("cpe:/o:centos:centos:6").unwrap();
        assert_eq!(cpe.part, "o");
        assert_eq!(cpe.vendor, "centos");
        assert_eq!(cpe.product, "centos");
        assert_eq!(cpe.version, "6");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Cpe::parse("not a cpe").is_none());
        assert!(Cpe::parse("cpe:/").is_none());
    }

    #[test]
    fn test_version_normalization() {
        assert_eq!(normalize_version("6.5 (Final)"), "6.5");
        assert_eq!(normalize_version("release 12.04.1 LTS"), "12.04.1");
        assert_eq!(normalize_version("squeeze"), "");
        assert_eq!(normalize_version("11.0."), "11.0");
    }

    #[test]
    fn test_keys() {
        let cpe = Cpe::new("o", "Ubuntu", "ubuntu_linux", "12.04");
        assert_eq!(cpe.key(), PlatformKey::new("ubuntu", "12.04"));
        assert_eq!(cpe.wildcard_key(), PlatformKey::new("ubuntu", "*"));
        assert_eq!(cpe.major_version(), Some("12"));
    }

    #[test]
    fn test_display_round_trip() {
        let cpe = Cpe::new("o", "debian", "debian_linux", "7.2");
        let parsed = Cpe::parse(&cpe.to_string()).unwrap();
        assert_eq!(parsed, cpe);
    }
}
