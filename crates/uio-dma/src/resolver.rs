//! Virtual → physical frame resolution.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{DmaError, Result, TranslationFailure};
use crate::{PhysicalAddress, VirtualAddress};

/// Bits 0..=54 of a pagemap entry hold the page frame number.
pub const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;
/// Bit 63 of a pagemap entry: page present in RAM.
pub const PAGEMAP_PRESENT: u64 = 1 << 63;
/// Size of one pagemap entry in bytes.
pub const PAGEMAP_ENTRY_LEN: u64 = 8;

/// Resolves the physical frame backing a (faulted-in) virtual page.
pub trait FrameResolver: Send + Sync {
    fn resolve(&self, virt: VirtualAddress, page_size: usize) -> Result<PhysicalAddress>;
}

/// Decodes one 64-bit pagemap entry for `virt`.
///
/// The 9 flag bits above the PFN are masked off and the in-page offset of `virt` is carried over.
pub fn decode_pagemap_entry(
    entry: u64,
    virt: VirtualAddress,
    page_size: usize,
) -> Result<PhysicalAddress> {
    if entry & PAGEMAP_PRESENT == 0 {
        return Err(DmaError::TranslationFailed {
            virt,
            reason: TranslationFailure::NotPresent,
        });
    }
    let pfn = entry & PAGEMAP_PFN_MASK;
    if pfn == 0 {
        return Err(DmaError::TranslationFailed {
            virt,
            reason: TranslationFailure::FrameHidden,
        });
    }
    pfn.checked_mul(page_size as u64)
        .and_then(|frame| frame.checked_add(virt.page_offset(page_size) as u64))
        .map(PhysicalAddress)
        .ok_or(DmaError::TranslationFailed {
            virt,
            reason: TranslationFailure::OutOfRange,
        })
}

/// Kernel page-table introspection through `/proc/<pid>/pagemap`.
///
/// Reading real PFNs requires `CAP_SYS_ADMIN`; without it every entry decodes as
/// [`TranslationFailure::FrameHidden`].
#[derive(Debug)]
pub struct Pagemap {
    file: File,
}

impl Pagemap {
    pub const SELF_PATH: &'static str = "/proc/self/pagemap";

    pub fn open() -> io::Result<Self> {
        Self::open_path(Self::SELF_PATH)
    }

    pub fn open_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    fn read_entry(&self, virt: VirtualAddress, page_size: usize) -> io::Result<u64> {
        let index = (virt.as_usize() / page_size) as u64;
        let mut raw = [0u8; PAGEMAP_ENTRY_LEN as usize];
        self.file.read_exact_at(&mut raw, index * PAGEMAP_ENTRY_LEN)?;
        Ok(u64::from_ne_bytes(raw))
    }
}

impl FrameResolver for Pagemap {
    fn resolve(&self, virt: VirtualAddress, page_size: usize) -> Result<PhysicalAddress> {
        let entry = self.read_entry(virt, page_size).map_err(|err| {
            tracing::debug!("pagemap read for {virt} failed: {err}");
            DmaError::TranslationFailed {
                virt,
                reason: TranslationFailure::Unreadable,
            }
        })?;
        decode_pagemap_entry(entry, virt, page_size)
    }
}

/// Maps every virtual address to the numerically identical "physical" address.
///
/// Only meaningful for device models that perform DMA through this process's own address space
/// (simulators and tests); real hardware must use [`Pagemap`].
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFrames;

impl FrameResolver for IdentityFrames {
    fn resolve(&self, virt: VirtualAddress, _page_size: usize) -> Result<PhysicalAddress> {
        Ok(PhysicalAddress(virt.as_usize() as u64))
    }
}
