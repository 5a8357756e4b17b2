//! PCI sysfs plumbing: identity check, bus mastering, BAR0 and UIO node lookup.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/pci/devices";

pub const INTEL_VENDOR_ID: u16 = 0x8086;
/// Network controller, Ethernet.
pub const ETHERNET_CLASS: u32 = 0x02_00_00;

/// 8254x parts sharing the register layout and EERD semantics the driver relies on.
pub const SUPPORTED_DEVICE_IDS: &[(u16, &str)] = &[
    (0x100E, "82540EM"),
    (0x100F, "82545EM copper"),
    (0x1011, "82545EM fiber"),
    (0x1015, "82540EM LOM"),
    (0x1016, "82540EP LOM"),
    (0x1017, "82540EP"),
    (0x101E, "82540EP LP"),
    (0x1026, "82545GM copper"),
    (0x1027, "82545GM fiber"),
    (0x1028, "82545GM SerDes"),
];

const PCI_COMMAND: u64 = 0x04;
const PCI_COMMAND_MEMORY: u16 = 1 << 1;
const PCI_COMMAND_BUS_MASTER: u16 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor: u16,
    pub device: u16,
    pub class: u32,
}

impl PciIdentity {
    pub fn model(&self) -> Option<&'static str> {
        SUPPORTED_DEVICE_IDS
            .iter()
            .find(|(id, _)| *id == self.device)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for PciIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} class {:06x}",
            self.vendor, self.device, self.class
        )
    }
}

/// One PCI function as exposed under `<root>/<bus:device.function>`.
#[derive(Debug, Clone)]
pub struct PciDevice {
    root: PathBuf,
    id: String,
}

impl PciDevice {
    pub fn new(root: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.id)
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    fn read_hex(&self, name: &str) -> Result<u32> {
        let path = self.attribute(name);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        parse_hex(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn identity(&self) -> Result<PciIdentity> {
        let vendor = self.read_hex("vendor")?;
        let device = self.read_hex("device")?;
        let class = self.read_hex("class")?;
        Ok(PciIdentity {
            vendor: u16::try_from(vendor).context("vendor id out of range")?,
            device: u16::try_from(device).context("device id out of range")?,
            class,
        })
    }

    /// Fails unless the function is a supported Intel e1000 Ethernet controller.
    pub fn verify_e1000(&self) -> Result<PciIdentity> {
        let identity = self.identity()?;
        if identity.vendor != INTEL_VENDOR_ID {
            bail!("{} is not an Intel device ({identity})", self.id);
        }
        if identity.class != ETHERNET_CLASS {
            bail!("{} is not an Ethernet controller ({identity})", self.id);
        }
        if identity.model().is_none() {
            bail!("{} is not a supported e1000 model ({identity})", self.id);
        }
        Ok(identity)
    }

    /// Sets memory-space and bus-master enable in the command register. Returns whether the
    /// register had to be changed.
    pub fn enable_bus_master(&self) -> Result<bool> {
        let path = self.attribute("config");
        let config = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;

        let mut raw = [0u8; 2];
        config
            .read_exact_at(&mut raw, PCI_COMMAND)
            .context("read PCI command register")?;
        let command = u16::from_le_bytes(raw);
        let wanted = command | PCI_COMMAND_MEMORY | PCI_COMMAND_BUS_MASTER;
        if wanted == command {
            return Ok(false);
        }
        config
            .write_all_at(&wanted.to_le_bytes(), PCI_COMMAND)
            .context("write PCI command register")?;
        tracing::debug!(
            device = %self.id,
            from = format_args!("{command:#06x}"),
            to = format_args!("{wanted:#06x}"),
            "enabled bus mastering"
        );
        Ok(true)
    }

    /// Opens BAR0 for mapping.
    pub fn open_resource0(&self) -> Result<File> {
        let path = self.attribute("resource0");
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))
    }

    /// `/dev/uioN` for the UIO device bound to this function.
    pub fn uio_node(&self) -> Result<PathBuf> {
        uio_node_in(&self.attribute("uio"), Path::new("/dev"))
    }
}

fn uio_node_in(uio_dir: &Path, dev_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(uio_dir).with_context(|| {
        format!(
            "read {} (is the device bound to uio_pci_generic?)",
            uio_dir.display()
        )
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with("uio") {
            names.push(name);
        }
    }
    names.sort();
    match names.first() {
        Some(name) => Ok(dev_dir.join(name)),
        None => bail!("no uio device under {}", uio_dir.display()),
    }
}

fn parse_hex(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid hex value {trimmed:?}"))
}
