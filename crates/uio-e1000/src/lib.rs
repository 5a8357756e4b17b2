//! Userspace driver for Intel e1000 (82540EM/82545EM class) Ethernet controllers.
//!
//! The driver talks to the adapter only through its BAR0 register window ([`Registers`]) and
//! DMA descriptor rings whose pages come from a [`uio_dma::PageAllocator`]. PCI discovery,
//! mapping and framing live outside this crate.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::fs::OpenOptions;
//! use uio_e1000::{E1000, E1000Config, MmioWindow, SpinWait, REGISTER_WINDOW_LEN};
//!
//! let resource = OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .open("/sys/bus/pci/devices/0000:02:02.0/resource0")?;
//! let window = unsafe { MmioWindow::map(&resource, REGISTER_WINDOW_LEN)? };
//! let allocator = uio_dma::PageAllocator::with_default_pagemap()?;
//! let mut nic = E1000::bring_up("0000:02:02.0", window, &allocator, E1000Config::default())?;
//!
//! let mut frame = [0u8; 2048];
//! let len = nic.receive(&mut frame, &mut SpinWait::new())?;
//! println!("{len} bytes");
//! # Ok(())
//! # }
//! ```

mod config;
mod desc;
mod device;
pub mod eeprom;
mod error;
mod mmio;
pub mod regs;
mod ring;
mod stats;
mod uio;
mod wait;

pub use config::{
    validate_ring_size, E1000Config, DEFAULT_INTERRUPT_MASK, DEFAULT_RING_SIZE, MAX_RING_SIZE,
    MIN_RING_SIZE,
};
pub use desc::{RxDesc, TxDesc, MAX_TX_PAYLOAD, RX_BUFFER_LEN};
pub use device::{BringUpState, E1000};
pub use eeprom::{detect_eeprom, format_mac, read_eeprom_word, read_mac, MacAddress};
pub use error::{Corruption, Error, Result};
pub use mmio::MmioWindow;
pub use regs::{InterruptCause, Registers, REGISTER_WINDOW_LEN};
pub use ring::{RxRing, Submitted, TxRing};
pub use stats::{InterruptStats, RingStats};
pub use uio::{InterruptListener, InterruptWait, UioInterrupt, DEFAULT_POLL_INTERVAL};
pub use wait::{CancelToken, SpinWait, Wake, WaitPolicy};
