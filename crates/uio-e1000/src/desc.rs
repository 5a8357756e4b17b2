//! Legacy receive/transmit descriptor layouts.

use crate::regs::{RxErrors, RxStatus, TxCommand, TxStatus};

/// Buffer size programmed through `RCTL.BSIZE`; every slot owns one buffer of this size.
pub const RX_BUFFER_LEN: usize = 2048;
/// Largest payload `send` accepts (one byte below the buffer size).
pub const MAX_TX_PAYLOAD: usize = RX_BUFFER_LEN - 1;

fn le_u16(bytes: &[u8; 16], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn le_u64(bytes: &[u8; 16], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Receive descriptor as stored in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxDesc {
    pub buffer_addr: u64,
    pub length: u16,
    pub checksum: u16,
    pub status: u8,
    pub errors: u8,
    pub special: u16,
}

impl RxDesc {
    pub const LEN: usize = 16;

    pub const ADDR: usize = 0;
    pub const LENGTH: usize = 8;
    pub const CHECKSUM: usize = 10;
    pub const STATUS: usize = 12;
    pub const ERRORS: usize = 13;
    pub const SPECIAL: usize = 14;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self {
            buffer_addr: le_u64(&bytes, Self::ADDR),
            length: le_u16(&bytes, Self::LENGTH),
            checksum: le_u16(&bytes, Self::CHECKSUM),
            status: bytes[Self::STATUS],
            errors: bytes[Self::ERRORS],
            special: le_u16(&bytes, Self::SPECIAL),
        }
    }

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[Self::ADDR..Self::ADDR + 8].copy_from_slice(&self.buffer_addr.to_le_bytes());
        bytes[Self::LENGTH..Self::LENGTH + 2].copy_from_slice(&self.length.to_le_bytes());
        bytes[Self::CHECKSUM..Self::CHECKSUM + 2].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[Self::STATUS] = self.status;
        bytes[Self::ERRORS] = self.errors;
        bytes[Self::SPECIAL..Self::SPECIAL + 2].copy_from_slice(&self.special.to_le_bytes());
        bytes
    }

    pub fn status_flags(&self) -> RxStatus {
        RxStatus::from_bits_retain(self.status)
    }

    pub fn error_flags(&self) -> RxErrors {
        RxErrors::from_bits_retain(self.errors)
    }
}

/// Legacy transmit descriptor as stored in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxDesc {
    pub buffer_addr: u64,
    pub length: u16,
    pub cso: u8,
    pub cmd: u8,
    pub status: u8,
    pub css: u8,
    pub special: u16,
}

impl TxDesc {
    pub const LEN: usize = 16;

    pub const ADDR: usize = 0;
    pub const LENGTH: usize = 8;
    pub const CSO: usize = 10;
    pub const CMD: usize = 11;
    pub const STATUS: usize = 12;
    pub const CSS: usize = 13;
    pub const SPECIAL: usize = 14;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self {
            buffer_addr: le_u64(&bytes, Self::ADDR),
            length: le_u16(&bytes, Self::LENGTH),
            cso: bytes[Self::CSO],
            cmd: bytes[Self::CMD],
            status: bytes[Self::STATUS],
            css: bytes[Self::CSS],
            special: le_u16(&bytes, Self::SPECIAL),
        }
    }

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[Self::ADDR..Self::ADDR + 8].copy_from_slice(&self.buffer_addr.to_le_bytes());
        bytes[Self::LENGTH..Self::LENGTH + 2].copy_from_slice(&self.length.to_le_bytes());
        bytes[Self::CSO] = self.cso;
        bytes[Self::CMD] = self.cmd;
        bytes[Self::STATUS] = self.status;
        bytes[Self::CSS] = self.css;
        bytes[Self::SPECIAL..Self::SPECIAL + 2].copy_from_slice(&self.special.to_le_bytes());
        bytes
    }

    pub fn status_flags(&self) -> TxStatus {
        TxStatus::from_bits_retain(self.status)
    }

    pub fn command_flags(&self) -> TxCommand {
        TxCommand::from_bits_retain(self.cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_fields_sit_at_hardware_offsets() {
        let desc = RxDesc {
            buffer_addr: 0x0102_0304_0506_0708,
            length: 0x1122,
            checksum: 0x3344,
            status: 0x03,
            errors: 0x80,
            special: 0x5566,
        };
        let bytes = desc.to_bytes();
        assert_eq!(
            bytes,
            [
                0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x22, 0x11, 0x44, 0x33, 0x03, 0x80,
                0x66, 0x55
            ]
        );
        assert_eq!(RxDesc::from_bytes(bytes), desc);
        assert!(desc.status_flags().contains(RxStatus::DD | RxStatus::EOP));
        assert_eq!(desc.error_flags(), RxErrors::RXE);
    }

    #[test]
    fn tx_fields_sit_at_hardware_offsets() {
        let mut bytes = [0u8; TxDesc::LEN];
        bytes[8] = 0x2a;
        bytes[10] = 0x11;
        bytes[11] = 0x1b;
        bytes[12] = 0x01;
        bytes[13] = 0x22;
        let desc = TxDesc::from_bytes(bytes);
        assert_eq!(desc.length, 0x2a);
        assert_eq!(desc.cso, 0x11);
        assert_eq!(desc.css, 0x22);
        assert_eq!(
            desc.command_flags(),
            TxCommand::EOP | TxCommand::IFCS | TxCommand::RS | TxCommand::RPS
        );
        assert_eq!(desc.status_flags(), TxStatus::DD);
        assert_eq!(desc.to_bytes(), bytes);
    }
}
