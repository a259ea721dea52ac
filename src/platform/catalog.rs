// src/platform/catalog.rs

//! Image and flavor catalogs
//!
//! Two generations are carried: the legacy V1 catalog with numeric image
//! identifiers and the current V2 catalog with opaque UUIDs. Image lookups
//! resolve an exact `(vendor, version)` match before falling back to the
//! vendor's `"*"` entry. Flavor selection scans the ordered flavor list
//! and records which axis forced the choice.
//!
//! Image identifiers are opaque here; region-specific resolution belongs
//! to the provisioner adapter.

use crate::error::{Error, Result};
use crate::platform::Cpe;
use std::fmt;

/// One compute shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlavorSpec {
    pub id: &'static str,
    pub memory_mib: u64,
    pub disk_gb: u64,
}

/// Which axis forced a flavor choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendReason {
    Memory,
    Disk,
}

impl fmt::Display for RecommendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendReason::Memory => write!(f, "RAM usage"),
            RecommendReason::Disk => write!(f, "Disk usage"),
        }
    }
}

/// A flavor pick with its justification
#[derive(Debug, Clone, Copy)]
pub struct FlavorRecommendation {
    pub spec: FlavorSpec,
    pub reason: RecommendReason,
}

/// Mapping from `(vendor, version)` to an opaque image identifier
#[derive(Debug)]
pub struct ImageMap {
    entries: &'static [(&'static str, &'static str, &'static str)],
}

impl ImageMap {
    /// Exact version match first, then the vendor's `"*"` fallback
    pub fn lookup(&self, vendor: &str, version: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(v, ver, _)| *v == vendor && *ver == version)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(v, ver, _)| *v == vendor && *ver == "*")
            })
            .map(|(_, _, id)| *id)
    }
}

/// One catalog generation
#[derive(Debug)]
pub struct Catalog {
    pub name: &'static str,
    flavors: &'static [FlavorSpec],
    managed: ImageMap,
    unmanaged: ImageMap,
}

impl Catalog {
    /// Resolve the boot image for a platform, or `None` when the vendor
    /// has no mapping.
    pub fn image_for(&self, cpe: &Cpe, managed: bool) -> Option<&'static str> {
        let map = if managed { &self.managed } else { &self.unmanaged };
        map.lookup(&cpe.vendor, &cpe.version)
    }

    /// Choose the smallest flavor exceeding both demands.
    ///
    /// With `swapping` set, the memory-driven pick is bumped one slot
    /// before the disk-driven and memory-driven picks are reconciled; a
    /// host already dipping into swap needs headroom beyond its measured
    /// footprint.
    pub fn flavor_for(
        &self,
        memory_mib: u64,
        disk_gb: u64,
        swapping: bool,
    ) -> Result<FlavorRecommendation> {
        let no_flavor = || Error::NoFlavor {
            memory_mib,
            disk_gb,
        };

        let mut mem_idx = self
            .flavors
            .iter()
            .position(|f| f.memory_mib > memory_mib)
            .ok_or_else(no_flavor)?;
        if swapping {
            mem_idx += 1;
            if mem_idx >= self.flavors.len() {
                return Err(no_flavor());
            }
        }

        let disk_idx = self
            .flavors
            .iter()
            .position(|f| f.disk_gb > disk_gb)
            .ok_or_else(no_flavor)?;

        let (idx, reason) = if disk_idx > mem_idx {
            (disk_idx, RecommendReason::Disk)
        } else {
            (mem_idx, RecommendReason::Memory)
        };

        Ok(FlavorRecommendation {
            spec: self.flavors[idx],
            reason,
        })
    }

    /// The ordered flavor list, smallest first
    pub fn flavors(&self) -> &'static [FlavorSpec] {
        self.flavors
    }
}

/// Legacy catalog: numeric image identifiers, first-generation flavors
pub static CATALOG_V1: Catalog = Catalog {
    name: "v1",
    flavors: &[
        FlavorSpec { id: "1", memory_mib: 256, disk_gb: 10 },
        FlavorSpec { id: "2", memory_mib: 512, disk_gb: 20 },
        FlavorSpec { id: "3", memory_mib: 1024, disk_gb: 40 },
        FlavorSpec { id: "4", memory_mib: 2048, disk_gb: 80 },
        FlavorSpec { id: "5", memory_mib: 4096, disk_gb: 160 },
        FlavorSpec { id: "6", memory_mib: 8192, disk_gb: 320 },
        FlavorSpec { id: "7", memory_mib: 15872, disk_gb: 620 },
        FlavorSpec { id: "8", memory_mib: 30720, disk_gb: 1200 },
    ],
    managed: ImageMap {
        entries: &[
            ("centos", "5", "51"),
            ("centos", "6", "118"),
            ("centos", "*", "118"),
            ("debian", "6", "104"),
            ("debian", "*", "104"),
            ("redhat", "5", "62"),
            ("redhat", "6", "120"),
            ("redhat", "*", "120"),
            ("ubuntu", "10.04", "49"),
            ("ubuntu", "11.04", "115"),
            ("ubuntu", "12.04", "125"),
            ("ubuntu", "*", "125"),
        ],
    },
    unmanaged: ImageMap {
        entries: &[
            ("arch", "*", "55"),
            ("centos", "5", "51"),
            ("centos", "6", "118"),
            ("centos", "*", "118"),
            ("debian", "5", "103"),
            ("debian", "6", "104"),
            ("debian", "*", "104"),
            ("fedora", "16", "116"),
            ("fedora", "17", "126"),
            ("fedora", "*", "126"),
            ("gentoo", "*", "108"),
            ("redhat", "5", "62"),
            ("redhat", "6", "120"),
            ("redhat", "*", "120"),
            ("ubuntu", "10.04", "49"),
            ("ubuntu", "11.04", "115"),
            ("ubuntu", "11.10", "119"),
            ("ubuntu", "12.04", "125"),
            ("ubuntu", "*", "125"),
        ],
    },
};

/// Current catalog: UUID image identifiers, second-generation flavors
pub static CATALOG_V2: Catalog = Catalog {
    name: "v2",
    flavors: &[
        FlavorSpec { id: "2", memory_mib: 512, disk_gb: 20 },
        FlavorSpec { id: "3", memory_mib: 1024, disk_gb: 40 },
        FlavorSpec { id: "4", memory_mib: 2048, disk_gb: 80 },
        FlavorSpec { id: "5", memory_mib: 4096, disk_gb: 160 },
        FlavorSpec { id: "6", memory_mib: 8192, disk_gb: 320 },
        FlavorSpec { id: "7", memory_mib: 15360, disk_gb: 620 },
        FlavorSpec { id: "8", memory_mib: 30720, disk_gb: 1200 },
    ],
    managed: ImageMap {
        entries: &[
            ("centos", "5.8", "03318d19-b6e6-4092-9b5c-4758ee0ada60"),
            ("centos", "6.3", "da1f0392-8c64-468f-a839-a9e56caebf07"),
            ("centos", "*", "da1f0392-8c64-468f-a839-a9e56caebf07"),
            ("debian", "6", "a10eacf7-ac15-4225-b533-5744f1fe47c1"),
            ("debian", "*", "a10eacf7-ac15-4225-b533-5744f1fe47c1"),
            ("redhat", "5.8", "644be485-411d-4bac-aba5-5f60641d92b5"),
            ("redhat", "6.3", "d6dd6c70-a122-4391-91a8-decb1a356549"),
            ("redhat", "*", "d6dd6c70-a122-4391-91a8-decb1a356549"),
            ("ubuntu", "10.04", "d531a2dd-7ae9-4407-bb5a-e5ea03303d98"),
            ("ubuntu", "11.04", "8bf22129-8483-462b-a020-1754ec822770"),
            ("ubuntu", "12.04", "5cebb13a-f783-4f8c-8058-c4182c724ccd"),
            ("ubuntu", "*", "5cebb13a-f783-4f8c-8058-c4182c724ccd"),
        ],
    },
    unmanaged: ImageMap {
        entries: &[
            ("amazon", "*", "a3a2c42f-575f-4381-9c6d-fcd3b7d07d17"),
            ("arch", "*", "c94f5e59-0760-467a-ae70-9a37cfa6b94e"),
            ("centos", "5.8", "03318d19-b6e6-4092-9b5c-4758ee0ada60"),
            ("centos", "6.3", "da1f0392-8c64-468f-a839-a9e56caebf07"),
            ("centos", "*", "da1f0392-8c64-468f-a839-a9e56caebf07"),
            ("debian", "6", "a10eacf7-ac15-4225-b533-5744f1fe47c1"),
            ("debian", "*", "a10eacf7-ac15-4225-b533-5744f1fe47c1"),
            ("fedora", "16", "bca91446-e60e-42e7-9e39-0582e7e20fb9"),
            ("fedora", "17", "d42f821e-c2d1-4796-9f07-af5ed7912d0e"),
            ("fedora", "*", "d42f821e-c2d1-4796-9f07-af5ed7912d0e"),
            ("gentoo", "*", "110d5bd8-a0dc-4cf5-8e75-149a58c17bbf"),
            ("redhat", "5.8", "644be485-411d-4bac-aba5-5f60641d92b5"),
            ("redhat", "6.3", "d6dd6c70-a122-4391-91a8-decb1a356549"),
            ("redhat", "*", "d6dd6c70-a122-4391-91a8-decb1a356549"),
            ("ubuntu", "10.04", "d531a2dd-7ae9-4407-bb5a-e5ea03303d98"),
            ("ubuntu", "11.04", "8bf22129-8483-462b-a020-1754ec822770"),
            ("ubuntu", "11.10", "3afe97b2-26dc-49c5-a2cc-a2fc8d80c001"),
            ("ubuntu", "12.04", "5cebb13a-f783-4f8c-8058-c4182c724ccd"),
            ("ubuntu", "*", "5cebb13a-f783-4f8c-8058-c4182c724ccd"),
        ],
    },
};
