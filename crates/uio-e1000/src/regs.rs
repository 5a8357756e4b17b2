//! Register offsets, bit definitions, and the register access seam.

use bitflags::bitflags;

pub const REG_CTRL: u32 = 0x0000;
pub const REG_STATUS: u32 = 0x0008;
pub const REG_EERD: u32 = 0x0014;
pub const REG_ICR: u32 = 0x00C0;
pub const REG_ITR: u32 = 0x00C4;
pub const REG_ICS: u32 = 0x00C8;
pub const REG_IMS: u32 = 0x00D0;
pub const REG_IMC: u32 = 0x00D8;
pub const REG_RCTL: u32 = 0x0100;
pub const REG_TCTL: u32 = 0x0400;
pub const REG_RDBAL: u32 = 0x2800;
pub const REG_RDBAH: u32 = 0x2804;
pub const REG_RDLEN: u32 = 0x2808;
pub const REG_RDH: u32 = 0x2810;
pub const REG_RDT: u32 = 0x2818;
pub const REG_TDBAL: u32 = 0x3800;
pub const REG_TDBAH: u32 = 0x3804;
pub const REG_TDLEN: u32 = 0x3808;
pub const REG_TDH: u32 = 0x3810;
pub const REG_TDT: u32 = 0x3818;
/// Multicast table array, 128 words ending where the receive address registers begin.
pub const REG_MTA: u32 = 0x5200;
pub const REG_MTA_END: u32 = 0x5400;
pub const REG_RAL0: u32 = 0x5400;
pub const REG_RAH0: u32 = 0x5404;

/// Size of the BAR0 register window.
pub const REGISTER_WINDOW_LEN: usize = 0x20000;

pub const EERD_START: u32 = 1 << 0;
/// DONE bit when a real EEPROM is attached; address field starts at bit 8.
pub const EERD_DONE_EEPROM: u32 = 1 << 4;
pub const EERD_ADDR_SHIFT_EEPROM: u32 = 8;
/// DONE bit for the flash-mirrored variant; address field starts at bit 2.
pub const EERD_DONE_FLASH: u32 = 1 << 1;
pub const EERD_ADDR_SHIFT_FLASH: u32 = 2;
pub const EERD_DATA_SHIFT: u32 = 16;

pub const TCTL_CT_SHIFT: u32 = 4;
pub const TCTL_COLD_SHIFT: u32 = 12;
pub const TCTL_CT_DEFAULT: u32 = 0x10;
pub const TCTL_COLD_DEFAULT: u32 = 0x40;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const FD = 1 << 0;
        const LU = 1 << 1;
        const TXOFF = 1 << 4;
    }
}

bitflags! {
    /// Receive control. Zero-valued fields (LBM_NONE, RDMTS_HALF, BSIZE_2048) are implied.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Rctl: u32 {
        const EN = 1 << 1;
        const SBP = 1 << 2;
        const UPE = 1 << 3;
        const MPE = 1 << 4;
        const LPE = 1 << 5;
        const BAM = 1 << 15;
        const VFE = 1 << 18;
        const DPF = 1 << 22;
        const PMCF = 1 << 23;
        const BSEX = 1 << 25;
        const SECRC = 1 << 26;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Tctl: u32 {
        const EN = 1 << 1;
        const PSP = 1 << 3;
        const SWXOFF = 1 << 22;
        const RTLC = 1 << 24;
        const NRTU = 1 << 25;
    }
}

bitflags! {
    /// Interrupt causes, shared by ICR/ICS/IMS/IMC.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InterruptCause: u32 {
        const TXDW = 1 << 0;
        const TXQE = 1 << 1;
        const LSC = 1 << 2;
        const RXSEQ = 1 << 3;
        const RXDMT0 = 1 << 4;
        const RXO = 1 << 6;
        const RXT0 = 1 << 7;
        const MDAC = 1 << 9;
        const RXCFG = 1 << 10;
        const PHYINT = 1 << 12;
        const GPI0 = 1 << 13;
        const GPI1 = 1 << 14;
        const TXDLOW = 1 << 15;
        const SRPD = 1 << 16;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct RxStatus: u8 {
        const DD = 1 << 0;
        const EOP = 1 << 1;
        const VP = 1 << 3;
        const UDPCS = 1 << 4;
        const TCPCS = 1 << 5;
        const IPCS = 1 << 6;
        const PIF = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct RxErrors: u8 {
        const CE = 1 << 0;
        const SE = 1 << 1;
        const SEQ = 1 << 2;
        const CXE = 1 << 4;
        const TCPE = 1 << 5;
        const IPE = 1 << 6;
        const RXE = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TxStatus: u8 {
        const DD = 1 << 0;
        const EC = 1 << 1;
        const LC = 1 << 2;
        const TU = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TxCommand: u8 {
        const EOP = 1 << 0;
        const IFCS = 1 << 1;
        const IC = 1 << 2;
        const RS = 1 << 3;
        const RPS = 1 << 4;
        const VLE = 1 << 6;
        const IDE = 1 << 7;
    }
}

/// Fixed receive profile: promiscuous, broadcast accept, CRC strip, 2048-byte buffers.
pub const RCTL_PROFILE: Rctl = Rctl::EN
    .union(Rctl::SBP)
    .union(Rctl::UPE)
    .union(Rctl::MPE)
    .union(Rctl::BAM)
    .union(Rctl::SECRC);

pub fn tctl_profile() -> u32 {
    (Tctl::EN | Tctl::PSP | Tctl::RTLC).bits()
        | (TCTL_CT_DEFAULT << TCTL_CT_SHIFT)
        | (TCTL_COLD_DEFAULT << TCTL_COLD_SHIFT)
}

/// Command bits for a single-descriptor frame with completion write-back.
pub const TX_COMMAND_PROFILE: TxCommand = TxCommand::EOP
    .union(TxCommand::IFCS)
    .union(TxCommand::RS)
    .union(TxCommand::RPS);

/// 32-bit register access at byte offsets into the device's register space.
pub trait Registers {
    fn read_register(&mut self, offset: u32) -> u32;
    fn write_register(&mut self, offset: u32, value: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_profiles_match_hardware_values() {
        assert_eq!(RCTL_PROFILE.bits(), 0x0400_801E);
        assert_eq!(tctl_profile(), 0x0104_010A);
        assert_eq!(TX_COMMAND_PROFILE.bits(), 0x1B);
    }

    #[test]
    fn multicast_table_is_128_words() {
        assert_eq!((REG_MTA_END - REG_MTA) / 4, 128);
        assert_eq!(REG_MTA_END, REG_RAL0);
    }
}
