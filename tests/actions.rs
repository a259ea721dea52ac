// tests/actions.rs

//! Layered platform action composition across the supported platforms.

use cloudflock::actions::{cleanup_for, exclusions_for};
use cloudflock::platform::Cpe;

#[test]
fn test_every_vendor_gets_the_base_exclusions() {
    let vendors = [
        "arch", "centos", "debian", "fedora", "gentoo", "redhat", "scientific", "suse", "ubuntu",
        "amazon",
    ];
    for vendor in vendors {
        let cpe = Cpe::new("o", vendor, vendor, "6");
        let list = exclusions_for(&cpe);
        for base in ["/boot", "/dev", "/proc", "/sys", "/tmp", "/var/log"] {
            assert!(
                list.paths().contains(&base.to_string()),
                "{} missing {}",
                vendor,
                base
            );
        }
    }
}

#[test]
fn test_network_config_is_never_transferred() {
    // Each family keeps the destination's own network identity.
    let redhat = exclusions_for(&Cpe::new("o", "centos", "centos", "6.3"));
    assert!(redhat
        .paths()
        .contains(&"/etc/sysconfig/network-scripts/*".to_string()));

    let debian = exclusions_for(&Cpe::new("o", "ubuntu", "ubuntu", "12.04"));
    assert!(debian
        .paths()
        .contains(&"/etc/network/interfaces".to_string()));

    let arch = exclusions_for(&Cpe::new("o", "arch", "arch", ""));
    assert!(arch.paths().contains(&"/etc/rc.conf".to_string()));
}

#[test]
fn test_enterprise_linux_product_resolves_version_layer() {
    // /etc/system-release-cpe on RHEL names the product enterprise_linux.
    let cpe = Cpe::parse("cpe:/o:redhat:enterprise_linux:5.8").unwrap();
    let list = exclusions_for(&cpe);
    assert!(list
        .paths()
        .contains(&"/etc/sysconfig/hwconf".to_string()));
}

#[test]
fn test_engine_artifacts_are_excluded() {
    // The engine's own working directory must never be copied into the
    // destination.
    for vendor in ["centos", "ubuntu", ""] {
        let list = exclusions_for(&Cpe::new("o", vendor, vendor, "6"));
        assert!(list.paths().contains(&"/root/.cloudflock".to_string()));
    }
}

#[test]
fn test_cleanup_plans_are_complete_for_all_vendors() {
    let vendors = ["arch", "centos", "debian", "fedora", "gentoo", "redhat", "ubuntu", ""];
    for vendor in vendors {
        let plan = cleanup_for(&Cpe::new("o", vendor, vendor, "6"));
        assert!(!plan.pre.is_empty(), "{} has no pre phase", vendor);
        assert!(!plan.chroot.is_empty(), "{} has no chroot phase", vendor);
        assert!(!plan.post.is_empty(), "{} has no post phase", vendor);
        // Every mount in pre has an unmount in post.
        let mounts = plan
            .pre
            .iter()
            .filter(|l| l.starts_with("mount -o bind"))
            .count();
        let unmounts = plan.post.iter().filter(|l| l.starts_with("umount")).count();
        assert_eq!(mounts, unmounts, "{} mount/unmount mismatch", vendor);
    }
}

#[test]
fn test_package_cache_cleanup_follows_family() {
    assert!(cleanup_for(&Cpe::new("o", "centos", "centos", "6"))
        .chroot_script()
        .contains("yum clean all"));
    assert!(cleanup_for(&Cpe::new("o", "ubuntu", "ubuntu", "12.04"))
        .chroot_script()
        .contains("apt-get clean"));
    assert!(cleanup_for(&Cpe::new("o", "arch", "arch", ""))
        .chroot_script()
        .contains("pacman -Scc"));
    // Unknown platforms get the base plan only.
    let unknown = cleanup_for(&Cpe::new("o", "", "", ""));
    assert!(!unknown.chroot_script().contains("yum"));
    assert!(!unknown.chroot_script().contains("apt-get"));
}
