// src/actions/exclusions.rs

//! Per-platform rsync exclusion lists
//!
//! The base layer excludes pseudo-filesystems and everything that defines
//! the destination's own identity (boot chain, network config, host keys).
//! Vendor layers add the paths only that family uses.

use crate::actions::resolve_layers;
use crate::platform::Cpe;

/// Platform-agnostic exclusions
static BASE: &str = "\
/boot
/dev
/etc/fstab
/etc/hostname
/etc/HOSTNAME
/etc/hosts
/etc/lvm
/etc/mdadm*
/etc/mtab
/etc/networks
/etc/resolv.conf
/etc/ssh/ssh_host_*
/etc/udev
/lib/modules
/lost+found
/media
/mnt
/net
/proc
/root/.cloudflock
/selinux
/sys
/tmp
/var/log";

/// Layer table: key along the platform path, newline-joined payload
static LAYERS: &[(&str, &str)] = &[
    ("unix", BASE),
    (
        "redhat",
        "/etc/sysconfig/network\n/etc/sysconfig/network-scripts/*",
    ),
    (
        "centos",
        "/etc/sysconfig/network\n/etc/sysconfig/network-scripts/*",
    ),
    (
        "scientific",
        "/etc/sysconfig/network\n/etc/sysconfig/network-scripts/*",
    ),
    (
        "amazon",
        "/etc/sysconfig/network\n/etc/sysconfig/network-scripts/*\n/etc/cloud",
    ),
    (
        "fedora",
        "/etc/sysconfig/network\n/etc/sysconfig/network-scripts/*",
    ),
    (
        "debian",
        "/etc/network/interfaces\n/etc/network/interfaces.d/*",
    ),
    (
        "ubuntu",
        "/etc/network/interfaces\n/etc/network/interfaces.d/*\n/etc/init/*.override",
    ),
    ("ubuntu10.04", "/etc/init.d/hwclock*"),
    ("arch", "/etc/rc.conf\n/etc/network.d/*"),
    ("gentoo", "/etc/conf.d/net"),
    ("suse", "/etc/sysconfig/network/*"),
    ("centos5", "/etc/sysconfig/hwconf"),
    ("centos5.8", "/etc/sysconfig/hwconf"),
    ("redhat5", "/etc/sysconfig/hwconf"),
    // Red Hat's own CPE names the product enterprise_linux.
    ("enterprise_linux5.8", "/etc/sysconfig/hwconf"),
];

/// Ordered exclusion path patterns for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionList {
    paths: Vec<String>,
}

impl ExclusionList {
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Newline-joined form, as written to the exclusions file
    pub fn render(&self) -> String {
        self.paths.join("\n")
    }
}

/// Compose the exclusion list for a platform, base layer first.
pub fn exclusions_for(cpe: &Cpe) -> ExclusionList {
    let paths = resolve_layers(LAYERS, cpe)
        .into_iter()
        .flat_map(|payload| payload.lines())
        .map(|line| line.to_string())
        .collect();
    ExclusionList { paths }
}
