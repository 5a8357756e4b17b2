//! Descriptor rings. Each ring owns its control page and one buffer page per slot, so no page
//! can be released while the hardware may still reference it through the ring.

use std::sync::atomic::{fence, Ordering};

use uio_dma::{DmaPage, PageAllocator, PhysicalAddress};

use crate::config::validate_ring_size;
use crate::desc::{RxDesc, TxDesc, MAX_TX_PAYLOAD, RX_BUFFER_LEN};
use crate::error::{Corruption, Error, Result};
use crate::regs::{
    tctl_profile, Registers, RxErrors, RxStatus, TxStatus, RCTL_PROFILE, REG_RCTL, REG_RDBAH,
    REG_RDBAL, REG_RDH, REG_RDLEN, REG_RDT, REG_TCTL, REG_TDBAH, REG_TDBAL, REG_TDH, REG_TDLEN,
    REG_TDT, TX_COMMAND_PROFILE,
};

/// Register block of one descriptor queue.
#[derive(Debug, Clone, Copy)]
struct QueueRegisters {
    bal: u32,
    bah: u32,
    len: u32,
    head: u32,
    tail: u32,
}

const RX_QUEUE: QueueRegisters = QueueRegisters {
    bal: REG_RDBAL,
    bah: REG_RDBAH,
    len: REG_RDLEN,
    head: REG_RDH,
    tail: REG_RDT,
};

const TX_QUEUE: QueueRegisters = QueueRegisters {
    bal: REG_TDBAL,
    bah: REG_TDBAH,
    len: REG_TDLEN,
    head: REG_TDH,
    tail: REG_TDT,
};

/// Control page plus per-slot buffers; shared by both directions.
#[derive(Debug)]
struct Slots {
    control: DmaPage,
    buffers: Vec<DmaPage>,
}

impl Slots {
    fn allocate(allocator: &PageAllocator, count: usize, desc_len: usize) -> Result<Self> {
        validate_ring_size(count)?;
        if allocator.page_size() < count * desc_len || allocator.page_size() < RX_BUFFER_LEN {
            return Err(Error::InvalidConfig(
                "page size too small for the descriptor ring or its buffers",
            ));
        }
        let control = allocator.allocate_page()?;
        let buffers = (0..count)
            .map(|_| allocator.allocate_page())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { control, buffers })
    }

    fn len(&self) -> usize {
        self.buffers.len()
    }

    fn program<R: Registers + ?Sized>(&self, regs: &mut R, queue: QueueRegisters, tail: u32) {
        let base = self.control.physical_address();
        regs.write_register(queue.bal, base.low_u32());
        regs.write_register(queue.bah, base.high_u32());
        regs.write_register(queue.len, (self.len() * RxDesc::LEN) as u32);
        regs.write_register(queue.head, 0);
        regs.write_register(queue.tail, tail);
    }
}

fn descriptor_offset(index: usize) -> usize {
    index * RxDesc::LEN
}

/// Receive ring. Software consumes slots in order starting at `cur`.
#[derive(Debug)]
pub struct RxRing {
    slots: Slots,
    cur: usize,
}

impl RxRing {
    /// Allocates the ring, fills every slot with an empty buffer, programs the RX queue
    /// registers and enables the receiver with the fixed RCTL profile.
    pub fn new<R: Registers + ?Sized>(
        regs: &mut R,
        allocator: &PageAllocator,
        count: usize,
    ) -> Result<Self> {
        let mut slots = Slots::allocate(allocator, count, RxDesc::LEN)?;
        for index in 0..count {
            let desc = RxDesc {
                buffer_addr: slots.buffers[index].physical_address().as_u64(),
                length: RX_BUFFER_LEN as u16,
                ..RxDesc::default()
            };
            slots
                .control
                .copy_from_slice(descriptor_offset(index), &desc.to_bytes());
        }
        fence(Ordering::Release);

        slots.program(regs, RX_QUEUE, (count - 1) as u32);
        regs.write_register(REG_RCTL, RCTL_PROFILE.bits());
        tracing::debug!(count, base = %slots.control.physical_address(), "RX ring programmed");
        Ok(Self { slots, cur: 0 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == 0
    }

    pub fn cursor(&self) -> usize {
        self.cur
    }

    pub fn base_address(&self) -> PhysicalAddress {
        self.slots.control.physical_address()
    }

    /// Snapshot of the descriptor at `index`.
    pub fn descriptor(&self, index: usize) -> RxDesc {
        let mut bytes = [0u8; RxDesc::LEN];
        self.slots
            .control
            .copy_to_slice(descriptor_offset(index), &mut bytes);
        RxDesc::from_bytes(bytes)
    }

    /// Takes the frame at the cursor if hardware has completed it.
    pub fn poll<R: Registers + ?Sized>(&mut self, regs: &mut R, buf: &mut [u8]) -> Result<usize> {
        let index = self.cur;
        let base = descriptor_offset(index);
        let control = &self.slots.control;

        let status = RxStatus::from_bits_retain(control.read_u8(base + RxDesc::STATUS));
        if !status.contains(RxStatus::DD) {
            return Err(Error::WouldBlock);
        }
        // Descriptor fields written before DD must not be read ahead of it.
        fence(Ordering::Acquire);

        // A flagged frame is dropped whatever its other fields say.
        let errors = control.read_u8(base + RxDesc::ERRORS);
        if errors != 0 {
            let errors = RxErrors::from_bits_retain(errors);
            tracing::warn!(index, ?errors, "receive hardware error");
            self.recycle(regs, index);
            return Err(Error::ReceiveHardwareError { index, errors });
        }

        let length = control.read_u16(base + RxDesc::LENGTH);
        if usize::from(length) >= RX_BUFFER_LEN {
            tracing::error!(index, length, "receive descriptor length exceeds buffer");
            return Err(Error::DescriptorCorruption {
                index,
                kind: Corruption::Length(length),
            });
        }
        let addr = control.read_u64(base + RxDesc::ADDR);
        let page = &self.slots.buffers[index];
        if addr != page.physical_address().as_u64() {
            tracing::error!(
                index,
                addr = format_args!("{addr:#x}"),
                expected = %page.physical_address(),
                "receive descriptor points outside its slot"
            );
            return Err(Error::DescriptorCorruption {
                index,
                kind: Corruption::Address(addr),
            });
        }

        let copied = usize::from(length).min(buf.len());
        page.copy_to_slice(0, &mut buf[..copied]);
        self.recycle(regs, index);
        Ok(copied)
    }

    /// Returns the slot to hardware: clears status, publishes the consumed index as RDT, and
    /// advances the cursor.
    fn recycle<R: Registers + ?Sized>(&mut self, regs: &mut R, index: usize) {
        self.slots
            .control
            .write_u8(descriptor_offset(index) + RxDesc::STATUS, 0);
        fence(Ordering::Release);
        regs.write_register(REG_RDT, index as u32);
        self.cur = (index + 1) % self.len();
    }
}

/// Outcome of queueing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub index: usize,
    /// EC/LC/TU bits left by the previous frame sent from this slot.
    pub previous_errors: TxStatus,
}

/// Transmit ring. Slots start completed (DD set) so the first pass never waits.
#[derive(Debug)]
pub struct TxRing {
    slots: Slots,
    cur: usize,
}

impl TxRing {
    pub fn new<R: Registers + ?Sized>(
        regs: &mut R,
        allocator: &PageAllocator,
        count: usize,
    ) -> Result<Self> {
        let mut slots = Slots::allocate(allocator, count, TxDesc::LEN)?;
        for index in 0..count {
            let desc = TxDesc {
                buffer_addr: slots.buffers[index].physical_address().as_u64(),
                status: TxStatus::DD.bits(),
                ..TxDesc::default()
            };
            slots
                .control
                .copy_from_slice(descriptor_offset(index), &desc.to_bytes());
        }
        fence(Ordering::Release);

        slots.program(regs, TX_QUEUE, 0);
        regs.write_register(REG_TCTL, tctl_profile());
        tracing::debug!(count, base = %slots.control.physical_address(), "TX ring programmed");
        Ok(Self { slots, cur: 0 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == 0
    }

    pub fn cursor(&self) -> usize {
        self.cur
    }

    pub fn base_address(&self) -> PhysicalAddress {
        self.slots.control.physical_address()
    }

    pub fn descriptor(&self, index: usize) -> TxDesc {
        let mut bytes = [0u8; TxDesc::LEN];
        self.slots
            .control
            .copy_to_slice(descriptor_offset(index), &mut bytes);
        TxDesc::from_bytes(bytes)
    }

    /// Copies `payload` into the slot at the cursor and hands it to hardware.
    pub fn submit<R: Registers + ?Sized>(
        &mut self,
        regs: &mut R,
        payload: &[u8],
    ) -> Result<Submitted> {
        if payload.len() > MAX_TX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_TX_PAYLOAD,
            });
        }

        let index = self.cur;
        let base = descriptor_offset(index);
        let status =
            TxStatus::from_bits_retain(self.slots.control.read_u8(base + TxDesc::STATUS));
        if !status.contains(TxStatus::DD) {
            return Err(Error::WouldBlock);
        }
        // TDT must never catch up with TDH or the hardware sees an empty ring, so at most N-1
        // frames are in flight: the slot after this one has to be completed as well.
        let next = descriptor_offset((index + 1) % self.len());
        let next_status =
            TxStatus::from_bits_retain(self.slots.control.read_u8(next + TxDesc::STATUS));
        if !next_status.contains(TxStatus::DD) {
            return Err(Error::WouldBlock);
        }
        fence(Ordering::Acquire);

        let previous_errors = status & (TxStatus::EC | TxStatus::LC | TxStatus::TU);
        if !previous_errors.is_empty() {
            tracing::warn!(index, errors = ?previous_errors, "transmit completed with errors");
        }

        self.slots.buffers[index].copy_from_slice(0, payload);
        let control = &mut self.slots.control;
        control.write_u16(base + TxDesc::LENGTH, payload.len() as u16);
        control.write_u8(base + TxDesc::CMD, TX_COMMAND_PROFILE.bits());
        control.write_u8(base + TxDesc::STATUS, 0);
        fence(Ordering::Release);

        self.cur = (index + 1) % self.len();
        regs.write_register(REG_TDT, self.cur as u32);
        Ok(Submitted {
            index,
            previous_errors,
        })
    }
}
