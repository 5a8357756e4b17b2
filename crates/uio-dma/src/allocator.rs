use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DmaError, Result};
use crate::resolver::{FrameResolver, Pagemap};
use crate::{PhysicalAddress, VirtualAddress};

/// Page-table capacity used by [`PageAllocator::with_default_pagemap`].
pub const DEFAULT_CAPACITY: usize = 1024;

const FALLBACK_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct PageRecord {
    virt: VirtualAddress,
    phys: PhysicalAddress,
}

struct Shared {
    table: Mutex<Vec<Option<PageRecord>>>,
    page_size: usize,
    resolver: Box<dyn FrameResolver>,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, Vec<Option<PageRecord>>> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn layout(&self) -> Result<Layout> {
        Layout::from_size_align(self.page_size, self.page_size).map_err(|_| {
            DmaError::AllocationFailed {
                size: self.page_size,
            }
        })
    }

    /// Finds the live page containing `phys` and returns its record plus the in-page offset.
    fn find_physical(
        table: &[Option<PageRecord>],
        page_size: usize,
        phys: PhysicalAddress,
    ) -> Option<(PageRecord, usize)> {
        table.iter().flatten().find_map(|record| {
            let offset = phys.as_u64().checked_sub(record.phys.as_u64())?;
            (offset < page_size as u64).then_some((*record, offset as usize))
        })
    }

    fn find_virtual(
        table: &[Option<PageRecord>],
        page_size: usize,
        virt: VirtualAddress,
    ) -> Option<(PageRecord, usize)> {
        table.iter().flatten().find_map(|record| {
            let offset = virt.as_usize().checked_sub(record.virt.as_usize())?;
            (offset < page_size).then_some((*record, offset))
        })
    }
}

fn host_page_size() -> usize {
    // Safety: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Bounded table of pinned, page-aligned, zeroed DMA pages.
///
/// Cloning the allocator shares the same table. Pages are returned as [`DmaPage`] handles which
/// release their buffer and clear their record when dropped.
#[derive(Clone)]
pub struct PageAllocator {
    shared: Arc<Shared>,
}

impl fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAllocator")
            .field("capacity", &self.capacity())
            .field("live_pages", &self.live_pages())
            .field("page_size", &self.shared.page_size)
            .finish()
    }
}

impl PageAllocator {
    pub fn new(capacity: usize, resolver: impl FrameResolver + 'static) -> Self {
        Self::with_page_size(capacity, host_page_size(), resolver)
    }

    /// Like [`PageAllocator::new`] with an explicit page size (a power of two).
    ///
    /// Real hardware needs the host page size; device models may use a smaller one.
    pub fn with_page_size(
        capacity: usize,
        page_size: usize,
        resolver: impl FrameResolver + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(vec![None; capacity]),
                page_size,
                resolver: Box::new(resolver),
            }),
        }
    }

    /// Allocator backed by `/proc/self/pagemap`.
    pub fn with_pagemap(capacity: usize) -> Result<Self> {
        Ok(Self::new(capacity, Pagemap::open()?))
    }

    pub fn with_default_pagemap() -> Result<Self> {
        Self::with_pagemap(DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock_table().len()
    }

    pub fn live_pages(&self) -> usize {
        self.shared.lock_table().iter().flatten().count()
    }

    pub fn page_size(&self) -> usize {
        self.shared.page_size
    }

    /// Allocates, faults in, pins and resolves one zeroed page.
    ///
    /// The table stays locked for the whole call so the slot claim is atomic with the search.
    pub fn allocate_page(&self) -> Result<DmaPage> {
        let mut table = self.shared.lock_table();
        let capacity = table.len();
        let slot = table
            .iter()
            .position(Option::is_none)
            .ok_or(DmaError::ResourceExhausted { capacity })?;

        let layout = self.shared.layout()?;
        // Safety: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(DmaError::AllocationFailed {
            size: layout.size(),
        })?;

        // Fault the page in so it is backed by its own frame rather than the shared zero page.
        // Safety: `ptr` points to `layout.size()` freshly allocated bytes.
        unsafe { ptr::write_volatile(ptr.as_ptr(), 0u8) };

        let pinned = pin(ptr, layout.size());
        let virt = VirtualAddress::from_ptr(ptr.as_ptr());
        let phys = match self.shared.resolver.resolve(virt, layout.size()) {
            Ok(phys) => phys,
            Err(err) => {
                release(ptr, layout, pinned);
                return Err(err);
            }
        };

        table[slot] = Some(PageRecord { virt, phys });
        tracing::debug!(slot, %virt, %phys, "allocated DMA page");

        Ok(DmaPage {
            shared: Arc::clone(&self.shared),
            slot,
            ptr,
            layout,
            pinned,
            phys,
        })
    }

    /// Releases the page and clears its record. Equivalent to dropping the handle.
    pub fn free_page(&self, page: DmaPage) {
        drop(page);
    }

    /// Virtual address for any physical address inside a live page.
    pub fn virtual_of(&self, phys: PhysicalAddress) -> Result<VirtualAddress> {
        let table = self.shared.lock_table();
        let (record, offset) = Shared::find_physical(&table, self.shared.page_size, phys)
            .ok_or(DmaError::NotFound)?;
        Ok(VirtualAddress(record.virt.as_usize() + offset))
    }

    /// Physical address for any virtual address inside a live page.
    pub fn physical_of(&self, virt: VirtualAddress) -> Result<PhysicalAddress> {
        let table = self.shared.lock_table();
        let (record, offset) = Shared::find_virtual(&table, self.shared.page_size, virt)
            .ok_or(DmaError::NotFound)?;
        Ok(PhysicalAddress(record.phys.as_u64() + offset as u64))
    }

    /// Device-side read of `buf.len()` bytes at `phys`. The range must stay within one live page.
    pub fn read_physical(&self, phys: PhysicalAddress, buf: &mut [u8]) -> Result<()> {
        let table = self.shared.lock_table();
        let (record, offset) = Shared::find_physical(&table, self.shared.page_size, phys)
            .ok_or(DmaError::NotFound)?;
        check_span(offset, buf.len(), self.shared.page_size)?;
        let src = (record.virt.as_usize() + offset) as *const u8;
        // Safety: the record is live while the table lock is held, and the span was checked
        // against the page bounds.
        unsafe { ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Device-side write of `buf` at `phys`. The range must stay within one live page.
    pub fn write_physical(&self, phys: PhysicalAddress, buf: &[u8]) -> Result<()> {
        let table = self.shared.lock_table();
        let (record, offset) = Shared::find_physical(&table, self.shared.page_size, phys)
            .ok_or(DmaError::NotFound)?;
        check_span(offset, buf.len(), self.shared.page_size)?;
        let dst = (record.virt.as_usize() + offset) as *mut u8;
        // Safety: see `read_physical`.
        unsafe { ptr::copy_nonoverlapping(buf.as_ptr(), dst, buf.len()) };
        Ok(())
    }
}

fn check_span(offset: usize, len: usize, page_size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= page_size => Ok(()),
        _ => Err(DmaError::OutOfBounds { offset, len }),
    }
}

fn pin(ptr: NonNull<u8>, len: usize) -> bool {
    // Safety: the range is a live allocation owned by the caller.
    let rc = unsafe { libc::mlock(ptr.as_ptr().cast(), len) };
    if rc != 0 {
        tracing::warn!(
            "mlock of DMA page failed, page may be swapped out: {}",
            std::io::Error::last_os_error()
        );
        return false;
    }
    true
}

fn release(ptr: NonNull<u8>, layout: Layout, pinned: bool) {
    if pinned {
        // Safety: the range was locked by `pin` and is still allocated.
        unsafe { libc::munlock(ptr.as_ptr().cast(), layout.size()) };
    }
    // Safety: `ptr` was returned by `alloc_zeroed(layout)` and is released exactly once.
    unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
}

/// One live DMA page. Dropping it frees the buffer and clears its table record.
///
/// Multi-byte accessors are little-endian and volatile; offsets must be naturally aligned.
pub struct DmaPage {
    shared: Arc<Shared>,
    slot: usize,
    ptr: NonNull<u8>,
    layout: Layout,
    pinned: bool,
    phys: PhysicalAddress,
}

// Safety: `DmaPage` exclusively owns its buffer; the shared table is behind a mutex.
unsafe impl Send for DmaPage {}

impl fmt::Debug for DmaPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaPage")
            .field("slot", &self.slot)
            .field("virt", &self.virtual_address())
            .field("phys", &self.phys)
            .finish()
    }
}

macro_rules! volatile_accessors {
    ($($read:ident, $write:ident, $ty:ty;)*) => {
        $(
            pub fn $read(&self, offset: usize) -> $ty {
                let ptr = self.field_ptr::<$ty>(offset);
                // Safety: `field_ptr` checked bounds and alignment.
                <$ty>::from_le(unsafe { ptr::read_volatile(ptr) })
            }

            pub fn $write(&mut self, offset: usize, value: $ty) {
                let ptr = self.field_ptr::<$ty>(offset);
                // Safety: `field_ptr` checked bounds and alignment.
                unsafe { ptr::write_volatile(ptr, value.to_le()) }
            }
        )*
    };
}

impl DmaPage {
    pub fn virtual_address(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.ptr.as_ptr())
    }

    pub fn physical_address(&self) -> PhysicalAddress {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    fn field_ptr<T>(&self, offset: usize) -> *mut T {
        let size = std::mem::size_of::<T>();
        assert!(
            offset + size <= self.len(),
            "access of {size} bytes at offset {offset:#x} past page end"
        );
        assert_eq!(offset % size, 0, "unaligned {size}-byte access at {offset:#x}");
        // Safety: in bounds per the assertion above.
        unsafe { self.ptr.as_ptr().add(offset).cast() }
    }

    volatile_accessors! {
        read_u8, write_u8, u8;
        read_u16, write_u16, u16;
        read_u32, write_u32, u32;
        read_u64, write_u64, u64;
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the page.
    pub fn copy_to_slice(&self, offset: usize, dst: &mut [u8]) {
        assert!(
            offset + dst.len() <= self.len(),
            "copy of {} bytes at offset {offset:#x} past page end",
            dst.len()
        );
        // Safety: bounds checked above; `dst` cannot alias the page since the page is never
        // handed out as a slice.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len())
        };
    }

    /// Copies `src` into the page starting at `offset`.
    pub fn copy_from_slice(&mut self, offset: usize, src: &[u8]) {
        assert!(
            offset + src.len() <= self.len(),
            "copy of {} bytes at offset {offset:#x} past page end",
            src.len()
        );
        // Safety: see `copy_to_slice`.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len())
        };
    }
}

impl Drop for DmaPage {
    fn drop(&mut self) {
        // Clear the record first so device-side accessors can no longer reach the buffer.
        self.shared.lock_table()[self.slot] = None;
        release(self.ptr, self.layout, self.pinned);
        tracing::debug!(slot = self.slot, phys = %self.phys, "freed DMA page");
    }
}
