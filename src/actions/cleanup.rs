// src/actions/cleanup.rs

//! Per-platform cleanup plans
//!
//! A cleanup plan is three ordered script bodies. `pre` runs on the
//! destination host against the mounted root, `chroot` runs inside it,
//! `post` unwinds whatever `pre` set up. Layers compose exactly like
//! exclusion lists: base first, vendor, then vendor+version. The base
//! layer's script bodies are rendered against the crate's filesystem
//! layout so they can never drift from the paths the rest of the
//! pipeline mounts and stages.

use crate::actions::resolve_layers;
use crate::paths::{DATA_DIR, MOUNT_POINT};
use crate::platform::Cpe;
use std::sync::OnceLock;

/// One layer's contribution: (pre, chroot, post) script fragments
type Phases = (String, String, String);

/// A vendor layer: chroot-only steps, nothing to mount or unmount
fn chroot_only(steps: &str) -> Phases {
    (String::new(), steps.to_string(), String::new())
}

/// Layer table along the platform path
fn layer_table() -> &'static [(&'static str, Phases)] {
    static TABLE: OnceLock<Vec<(&'static str, Phases)>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            let mp = MOUNT_POINT;
            vec![
                (
                    "unix",
                    (
                        format!(
                            "mkdir -p {mp}/proc {mp}/dev {mp}/sys\n\
                             mount -o bind /proc {mp}/proc\n\
                             mount -o bind /dev {mp}/dev\n\
                             mount -o bind /sys {mp}/sys\n\
                             rm -rf {mp}/var/run/*"
                        ),
                        format!(
                            "rm -f /etc/udev/rules.d/70-persistent-net.rules\n\
                             rm -f /var/lib/dhclient/*.leases /var/lib/dhcp/*.leases /var/lib/dhcp3/*.leases\n\
                             rm -f /core /core.*\n\
                             rm -f /var/run/*.pid\n\
                             rm -rf /var/lock/subsys/*\n\
                             rm -f {DATA_DIR}/chroot.sh"
                        ),
                        format!(
                            "umount {mp}/sys\n\
                             umount {mp}/dev\n\
                             umount {mp}/proc"
                        ),
                    ),
                ),
                (
                    "redhat",
                    chroot_only("yum clean all 2>/dev/null || true\nrm -f /etc/sysconfig/hwconf"),
                ),
                (
                    "centos",
                    chroot_only("yum clean all 2>/dev/null || true\nrm -f /etc/sysconfig/hwconf"),
                ),
                ("scientific", chroot_only("yum clean all 2>/dev/null || true")),
                ("fedora", chroot_only("yum clean all 2>/dev/null || true")),
                (
                    "amazon",
                    chroot_only(
                        "yum clean all 2>/dev/null || true\nrm -rf /var/lib/cloud/instance*",
                    ),
                ),
                ("debian", chroot_only("apt-get clean 2>/dev/null || true")),
                ("ubuntu", chroot_only("apt-get clean 2>/dev/null || true")),
                (
                    "ubuntu10.04",
                    chroot_only("rm -f /etc/init/plymouth*.override"),
                ),
                ("arch", chroot_only("pacman -Scc --noconfirm 2>/dev/null || true")),
                ("gentoo", chroot_only("rm -rf /var/tmp/portage/*")),
            ]
        })
        .as_slice()
}

/// The three ordered cleanup phases for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPlan {
    pub pre: Vec<String>,
    pub chroot: Vec<String>,
    pub post: Vec<String>,
}

impl CleanupPlan {
    /// Script body for the pre phase, run on the destination host
    pub fn pre_script(&self) -> String {
        render(&self.pre)
    }

    /// Script body for the chroot phase, run inside the mounted root
    pub fn chroot_script(&self) -> String {
        render(&self.chroot)
    }

    /// Script body for the post phase; unmount order is the reverse of the
    /// pre phase mounts
    pub fn post_script(&self) -> String {
        render(&self.post)
    }
}

fn render(lines: &[String]) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for line in lines {
        script.push_str(line);
        script.push('\n');
    }
    script
}

/// Compose the cleanup plan for a platform, base layer first.
pub fn cleanup_for(cpe: &Cpe) -> CleanupPlan {
    let mut plan = CleanupPlan {
        pre: Vec::new(),
        chroot: Vec::new(),
        post: Vec::new(),
    };
    for (pre, chroot, post) in resolve_layers(layer_table(), cpe) {
        plan.pre.extend(nonempty_lines(pre));
        plan.chroot.extend(nonempty_lines(chroot));
        plan.post.extend(nonempty_lines(post));
    }
    plan
}

fn nonempty_lines(payload: &str) -> Vec<String> {
    payload
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
