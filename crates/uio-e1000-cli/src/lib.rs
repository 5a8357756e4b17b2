//! Host-side glue for the `uio-e1000` binary: PCI sysfs access and frame helpers.

pub mod frame;
pub mod pci;
