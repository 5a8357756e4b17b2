//! EEPROM presence detection and station address extraction.

use crate::error::{Error, Result};
use crate::regs::{
    Registers, EERD_ADDR_SHIFT_EEPROM, EERD_ADDR_SHIFT_FLASH, EERD_DATA_SHIFT, EERD_DONE_EEPROM,
    EERD_DONE_FLASH, EERD_START, REG_EERD, REG_RAH0, REG_RAL0,
};

pub type MacAddress = [u8; 6];

/// Writes START to EERD and polls up to `retries` times for the EEPROM DONE bit.
pub fn detect_eeprom<R: Registers + ?Sized>(regs: &mut R, retries: u32) -> bool {
    regs.write_register(REG_EERD, EERD_START);
    for attempt in 0..retries {
        if regs.read_register(REG_EERD) & EERD_DONE_EEPROM != 0 {
            tracing::debug!(attempt, "EEPROM detected");
            return true;
        }
    }
    false
}

/// Reads one 16-bit word through EERD using the addressing form keyed on `has_eeprom`.
pub fn read_eeprom_word<R: Registers + ?Sized>(
    regs: &mut R,
    has_eeprom: bool,
    address: u8,
    retries: u32,
) -> Result<u16> {
    let (shift, done) = if has_eeprom {
        (EERD_ADDR_SHIFT_EEPROM, EERD_DONE_EEPROM)
    } else {
        (EERD_ADDR_SHIFT_FLASH, EERD_DONE_FLASH)
    };
    regs.write_register(REG_EERD, (u32::from(address) << shift) | EERD_START);
    for _ in 0..retries {
        let eerd = regs.read_register(REG_EERD);
        if eerd & done != 0 {
            return Ok((eerd >> EERD_DATA_SHIFT) as u16);
        }
    }
    Err(Error::EepromReadTimeout { address })
}

/// Station MAC: EEPROM words 0..=2 low byte first, or the six bytes mirrored at RAL0/RAH0.
pub fn read_mac<R: Registers + ?Sized>(
    regs: &mut R,
    has_eeprom: bool,
    retries: u32,
) -> Result<MacAddress> {
    let mut mac = [0u8; 6];
    if has_eeprom {
        for (word, pair) in mac.chunks_exact_mut(2).enumerate() {
            let value = read_eeprom_word(regs, true, word as u8, retries)?;
            pair.copy_from_slice(&value.to_le_bytes());
        }
    } else {
        let low = regs.read_register(REG_RAL0).to_le_bytes();
        let high = regs.read_register(REG_RAH0).to_le_bytes();
        mac[..4].copy_from_slice(&low);
        mac[4..].copy_from_slice(&high[..2]);
    }
    Ok(mac)
}

pub fn format_mac(mac: &MacAddress) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
