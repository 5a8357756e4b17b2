use thiserror::Error;

use crate::VirtualAddress;

pub type Result<T> = std::result::Result<T, DmaError>;

/// Why a virtual page could not be resolved to a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationFailure {
    /// The pagemap entry does not have the "present" bit set.
    NotPresent,
    /// The entry is present but the PFN reads as zero (the kernel hides PFNs from callers without
    /// `CAP_SYS_ADMIN`).
    FrameHidden,
    /// The pagemap could not be read.
    Unreadable,
    /// The frame number does not fit a 64-bit physical address.
    OutOfRange,
}

#[derive(Debug, Error)]
pub enum DmaError {
    #[error("page table is full ({capacity} pages)")]
    ResourceExhausted { capacity: usize },

    #[error("host allocator could not provide a {size}-byte page")]
    AllocationFailed { size: usize },

    #[error("no physical frame for {virt}: {reason:?}")]
    TranslationFailed {
        virt: VirtualAddress,
        reason: TranslationFailure,
    },

    #[error("address does not belong to any live page")]
    NotFound,

    #[error("access of {len} bytes at page offset {offset} crosses the page boundary")]
    OutOfBounds { offset: usize, len: usize },

    #[error("pagemap I/O error: {0}")]
    Io(#[from] std::io::Error),
}
