//! DMA-capable page allocation for userspace drivers.
//!
//! Pages are page-aligned, zeroed, faulted in and pinned; each one is paired with the physical
//! frame the device must be given. Frame resolution is pluggable through [`FrameResolver`] so the
//! same allocator serves real hardware ([`Pagemap`]) and device models ([`IdentityFrames`]).

mod addr;
mod allocator;
mod error;
mod resolver;

pub use addr::{PhysicalAddress, VirtualAddress};
pub use allocator::{DmaPage, PageAllocator, DEFAULT_CAPACITY};
pub use error::{DmaError, Result, TranslationFailure};
pub use resolver::{
    decode_pagemap_entry, FrameResolver, IdentityFrames, Pagemap, PAGEMAP_ENTRY_LEN,
    PAGEMAP_PFN_MASK, PAGEMAP_PRESENT,
};
