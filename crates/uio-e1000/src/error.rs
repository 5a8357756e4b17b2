use std::io;

use thiserror::Error;
use uio_dma::DmaError;

use crate::regs::RxErrors;

pub type Result<T> = std::result::Result<T, Error>;

/// What was wrong with a descriptor the hardware handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Reported length does not fit the fixed receive buffer.
    Length(u16),
    /// Buffer address does not match the page bound to the slot.
    Address(u64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("register window unavailable: {0}")]
    MappingFailed(#[source] io::Error),

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error("EEPROM presence not detected after {retries} polls")]
    EepromDetectTimeout { retries: u32 },

    #[error("EEPROM read of word {address} timed out")]
    EepromReadTimeout { address: u8 },

    #[error("descriptor {index} corrupted: {kind:?}")]
    DescriptorCorruption { index: usize, kind: Corruption },

    #[error("receive error on descriptor {index}: {errors:?}")]
    ReceiveHardwareError { index: usize, errors: RxErrors },

    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("descriptor not ready")]
    WouldBlock,

    #[error("wait timed out")]
    WaitTimeout,

    #[error("wait cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("interrupt handle I/O error: {0}")]
    Interrupt(#[source] io::Error),
}

impl Error {
    /// Whether the device instance must be discarded after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DescriptorCorruption { .. } | Error::MappingFailed(_) | Error::Dma(_)
        )
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }
}
