use std::fs;

use assert_cmd::Command;

fn uio_e1000() -> Command {
    let mut cmd = Command::cargo_bin("uio-e1000").unwrap();
    cmd.env_remove("UIO_E1000_PCI")
        .env_remove("UIO_E1000_SYSFS")
        .env_remove("UIO_E1000_UIO")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn pci_address_is_required() {
    let output = uio_e1000().output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--pci"), "{stderr}");
}

#[test]
fn foreign_device_is_refused_before_mapping() {
    let sysfs = tempfile::tempdir().unwrap();
    let dir = sysfs.path().join("0000:00:04.0");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("vendor"), "0x10ec\n").unwrap();
    fs::write(dir.join("device"), "0x8139\n").unwrap();
    fs::write(dir.join("class"), "0x020000\n").unwrap();

    let output = uio_e1000()
        .env("UIO_E1000_PCI", "0000:00:04.0")
        .arg("--sysfs")
        .arg(sysfs.path())
        .arg("listen")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not an Intel device"), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn arp_probe_needs_both_addresses() {
    let output = uio_e1000()
        .args(["--pci", "0000:00:03.0", "arp-probe", "--sender-ip", "10.0.2.15"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--target-ip"), "{stderr}");
}
