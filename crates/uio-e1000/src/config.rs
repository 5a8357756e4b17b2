use crate::error::{Error, Result};
use crate::regs::InterruptCause;

pub const DEFAULT_RING_SIZE: usize = 32;
pub const MIN_RING_SIZE: usize = 8;
/// 256 descriptors of 16 bytes fill exactly one 4 KiB control page.
pub const MAX_RING_SIZE: usize = 256;

/// Causes enabled in IMS when nothing else is configured. Each has a handler in
/// [`crate::E1000::handle_interrupt`].
pub const DEFAULT_INTERRUPT_MASK: InterruptCause = InterruptCause::TXDW
    .union(InterruptCause::LSC)
    .union(InterruptCause::RXT0)
    .union(InterruptCause::RXO);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E1000Config {
    pub rx_ring_size: usize,
    pub tx_ring_size: usize,
    /// Polls of EERD while probing for an EEPROM.
    pub eeprom_detect_retries: u32,
    /// Polls of EERD per word read.
    pub eeprom_read_retries: u32,
    pub interrupt_mask: InterruptCause,
    /// Fail bring-up instead of falling back to the flash-mirrored MAC.
    pub require_eeprom: bool,
}

impl Default for E1000Config {
    fn default() -> Self {
        Self {
            rx_ring_size: DEFAULT_RING_SIZE,
            tx_ring_size: DEFAULT_RING_SIZE,
            eeprom_detect_retries: 1000,
            eeprom_read_retries: 10_000,
            interrupt_mask: DEFAULT_INTERRUPT_MASK,
            require_eeprom: false,
        }
    }
}

impl E1000Config {
    pub fn validate(&self) -> Result<()> {
        validate_ring_size(self.rx_ring_size)
            .map_err(|_| Error::InvalidConfig("rx_ring_size must be a multiple of 8 in 8..=256"))?;
        validate_ring_size(self.tx_ring_size)
            .map_err(|_| Error::InvalidConfig("tx_ring_size must be a multiple of 8 in 8..=256"))?;
        if self.eeprom_detect_retries == 0 || self.eeprom_read_retries == 0 {
            return Err(Error::InvalidConfig("EEPROM retry counts must be non-zero"));
        }
        Ok(())
    }
}

/// RDLEN/TDLEN must be 128-byte aligned, i.e. a multiple of 8 descriptors.
pub fn validate_ring_size(size: usize) -> Result<()> {
    if (MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) && size % 8 == 0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig("ring size must be a multiple of 8 in 8..=256"))
    }
}
