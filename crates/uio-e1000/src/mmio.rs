use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::regs::{Registers, REGISTER_WINDOW_LEN};

/// Volatile view of a memory-mapped register window.
///
/// Either owns its mapping (created by [`MmioWindow::map`], unmapped on drop) or borrows one set
/// up elsewhere ([`MmioWindow::from_raw`]).
#[derive(Debug)]
pub struct MmioWindow {
    base: NonNull<u8>,
    len: usize,
    owned: bool,
}

// Safety: the window is only accessed through `&mut self`; device registers have no thread
// affinity.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// Maps `len` bytes of a BAR resource file (e.g. `/sys/bus/pci/devices/<id>/resource0`)
    /// shared and read/write.
    ///
    /// # Safety
    ///
    /// `file` must be a device register resource. Mapping a regular file works but register
    /// semantics (read-to-clear, self-clearing bits) will not hold.
    pub unsafe fn map(file: &File, len: usize) -> Result<Self> {
        if len < REGISTER_WINDOW_LEN {
            return Err(Error::MappingFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("register window of {len:#x} bytes is below {REGISTER_WINDOW_LEN:#x}"),
            )));
        }
        // Safety: a fresh shared mapping of a file we hold open; the kernel picks the address.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::MappingFailed(io::Error::last_os_error()));
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| Error::MappingFailed(io::Error::other("mmap returned null")))?;
        tracing::debug!(len, "mapped register window");
        Ok(Self {
            base,
            len,
            owned: true,
        })
    }

    /// Wraps an existing mapping without taking ownership of it.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `len` bytes that are valid for volatile 32-bit reads and
    /// writes for the lifetime of the returned window.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self> {
        if len < REGISTER_WINDOW_LEN {
            return Err(Error::MappingFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("register window of {len:#x} bytes is below {REGISTER_WINDOW_LEN:#x}"),
            )));
        }
        let base = NonNull::new(base)
            .ok_or_else(|| Error::MappingFailed(io::Error::other("null register window")))?;
        Ok(Self {
            base,
            len,
            owned: false,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn register_ptr(&self, offset: u32) -> *mut u32 {
        let offset = offset as usize;
        assert_eq!(offset % 4, 0, "unaligned register offset {offset:#x}");
        assert!(
            offset + 4 <= self.len,
            "register offset {offset:#x} outside {:#x}-byte window",
            self.len
        );
        // Safety: in bounds per the assertions above.
        unsafe { self.base.as_ptr().add(offset).cast() }
    }
}

impl Registers for MmioWindow {
    fn read_register(&mut self, offset: u32) -> u32 {
        let ptr = self.register_ptr(offset);
        // Safety: `register_ptr` checked alignment and bounds.
        u32::from_le(unsafe { ptr::read_volatile(ptr) })
    }

    fn write_register(&mut self, offset: u32, value: u32) {
        let ptr = self.register_ptr(offset);
        // Safety: `register_ptr` checked alignment and bounds.
        unsafe { ptr::write_volatile(ptr, value.to_le()) }
    }
}

impl Drop for MmioWindow {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        // Safety: `base`/`len` describe the mapping created in `map`, unmapped exactly once.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc != 0 {
            tracing::warn!(
                "munmap of register window failed: {}",
                io::Error::last_os_error()
            );
        }
    }
}
