use core::fmt;

/// An address in this process's virtual address space.
///
/// Only software may dereference it; DMA engines never see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub usize);

/// A bus/physical address as seen by the device's DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u64);

impl VirtualAddress {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }

    pub fn page_offset(self, page_size: usize) -> usize {
        self.0 % page_size
    }
}

impl PhysicalAddress {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Low 32 bits, as programmed into `*DBAL` registers.
    pub fn low_u32(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits, as programmed into `*DBAH` registers.
    pub fn high_u32(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "virt:0x{:x}", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phys:0x{:x}", self.0)
    }
}
