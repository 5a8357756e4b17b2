#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use uio_dma::{FrameResolver, PageAllocator, PhysicalAddress, Result as DmaResult, VirtualAddress};
use uio_e1000::regs::*;
use uio_e1000::{E1000Config, Registers, RxDesc, TxDesc, E1000};

/// Keeps "physical" addresses numerically distinct from the virtual ones, so any place the
/// driver confuses the two ends up pointing at nothing.
pub struct OffsetFrames;

pub const FRAME_XOR: u64 = 0x0000_4000_0000_0000;

impl FrameResolver for OffsetFrames {
    fn resolve(&self, virt: VirtualAddress, _page_size: usize) -> DmaResult<PhysicalAddress> {
        Ok(PhysicalAddress(virt.as_usize() as u64 ^ FRAME_XOR))
    }
}

pub fn allocator(capacity: usize) -> PageAllocator {
    PageAllocator::new(capacity, OffsetFrames)
}

pub const EEPROM_MAC_WORDS: [u16; 3] = [0x5452, 0x1200, 0x5634];
pub const EEPROM_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

pub struct SimState {
    regs: Vec<u32>,
    /// Every register write the driver performed, in order.
    pub writes: Vec<(u32, u32)>,
    /// Every register read, in order.
    pub reads: Vec<u32>,
    /// `None` models an adapter without EEPROM (flash-mirrored MAC, flash-style EERD).
    pub eeprom: Option<Vec<u16>>,
    pub flash: Vec<u16>,
    /// Polls of EERD before DONE is reported; `u32::MAX` never completes.
    pub eerd_latency: u32,
    eerd_polls: u32,
    eerd_request: u32,
    icr: u32,
    /// Extra status bits (EC/LC/TU) the model reports with each TX completion.
    pub tx_completion_errors: u8,
}

/// Register-level model of an e1000 plus the DMA side of its rings.
#[derive(Clone)]
pub struct SimNic {
    pub state: Rc<RefCell<SimState>>,
    dma: PageAllocator,
}

impl SimNic {
    pub fn new(dma: &PageAllocator) -> Self {
        let nic = Self {
            state: Rc::new(RefCell::new(SimState {
                regs: vec![0; REGISTER_WINDOW_LEN / 4],
                writes: Vec::new(),
                reads: Vec::new(),
                eeprom: Some({
                    let mut words = vec![0u16; 64];
                    words[..3].copy_from_slice(&EEPROM_MAC_WORDS);
                    words
                }),
                flash: vec![0u16; 64],
                eerd_latency: 2,
                eerd_polls: 0,
                eerd_request: 0,
                icr: 0,
                tx_completion_errors: 0,
            })),
            dma: dma.clone(),
        };
        nic.set_reg(REG_STATUS, (Status::LU | Status::FD).bits());
        nic
    }

    pub fn without_eeprom(dma: &PageAllocator, mac: [u8; 6]) -> Self {
        let nic = Self::new(dma);
        nic.state.borrow_mut().eeprom = None;
        nic.set_reg(REG_RAL0, u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]]));
        nic.set_reg(
            REG_RAH0,
            u32::from_le_bytes([mac[4], mac[5], 0x00, 0x80]),
        );
        nic
    }

    pub fn bring_up(&self, config: E1000Config) -> E1000<SimNic> {
        E1000::bring_up("0000:02:02.0", self.clone(), &self.dma, config).unwrap()
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.state.borrow().regs[(offset / 4) as usize]
    }

    pub fn set_reg(&self, offset: u32, value: u32) {
        self.state.borrow_mut().regs[(offset / 4) as usize] = value;
    }

    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.writes.clear();
        state.reads.clear();
    }

    pub fn raise(&self, cause: InterruptCause) {
        self.state.borrow_mut().icr |= cause.bits();
    }

    fn ring(&self, bal: u32, bah: u32, len: u32) -> (u64, usize) {
        let base = u64::from(self.reg(bal)) | (u64::from(self.reg(bah)) << 32);
        (base, self.reg(len) as usize / 16)
    }

    pub fn rx_ring(&self) -> (u64, usize) {
        self.ring(REG_RDBAL, REG_RDBAH, REG_RDLEN)
    }

    pub fn tx_ring(&self) -> (u64, usize) {
        self.ring(REG_TDBAL, REG_TDBAH, REG_TDLEN)
    }

    pub fn read_rx_desc(&self, index: usize) -> RxDesc {
        let (base, _) = self.rx_ring();
        let mut bytes = [0u8; RxDesc::LEN];
        self.dma
            .read_physical(PhysicalAddress(base + (index * RxDesc::LEN) as u64), &mut bytes)
            .unwrap();
        RxDesc::from_bytes(bytes)
    }

    pub fn write_rx_desc(&self, index: usize, desc: RxDesc) {
        let (base, _) = self.rx_ring();
        self.dma
            .write_physical(
                PhysicalAddress(base + (index * RxDesc::LEN) as u64),
                &desc.to_bytes(),
            )
            .unwrap();
    }

    pub fn read_tx_desc(&self, index: usize) -> TxDesc {
        let (base, _) = self.tx_ring();
        let mut bytes = [0u8; TxDesc::LEN];
        self.dma
            .read_physical(PhysicalAddress(base + (index * TxDesc::LEN) as u64), &mut bytes)
            .unwrap();
        TxDesc::from_bytes(bytes)
    }

    fn write_tx_desc(&self, index: usize, desc: TxDesc) {
        let (base, _) = self.tx_ring();
        self.dma
            .write_physical(
                PhysicalAddress(base + (index * TxDesc::LEN) as u64),
                &desc.to_bytes(),
            )
            .unwrap();
    }

    pub fn read_buffer(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.dma.read_physical(PhysicalAddress(addr), &mut out).unwrap();
        out
    }

    /// DMA a frame into the slot at RDH the way the MAC would. Returns `false` when receive is
    /// disabled or software has not made a slot available.
    pub fn deliver(&self, frame: &[u8]) -> bool {
        self.deliver_with_errors(frame, RxErrors::empty())
    }

    pub fn deliver_with_errors(&self, frame: &[u8], errors: RxErrors) -> bool {
        if self.reg(REG_RCTL) & Rctl::EN.bits() == 0 {
            return false;
        }
        let (_, count) = self.rx_ring();
        let head = self.reg(REG_RDH) as usize;
        if head == self.reg(REG_RDT) as usize {
            return false;
        }

        let mut desc = self.read_rx_desc(head);
        self.dma
            .write_physical(PhysicalAddress(desc.buffer_addr), frame)
            .unwrap();
        desc.length = frame.len() as u16;
        desc.status = (RxStatus::DD | RxStatus::EOP).bits();
        desc.errors = errors.bits();
        self.write_rx_desc(head, desc);

        self.set_reg(REG_RDH, ((head + 1) % count) as u32);
        self.raise(InterruptCause::RXT0);
        true
    }

    /// Transmits every queued descriptor between TDH and TDT and writes back completion status.
    pub fn complete_tx(&self) -> Vec<Vec<u8>> {
        let (_, count) = self.tx_ring();
        let mut sent = Vec::new();
        loop {
            let head = self.reg(REG_TDH) as usize;
            if head == self.reg(REG_TDT) as usize {
                break;
            }
            let mut desc = self.read_tx_desc(head);
            sent.push(self.read_buffer(desc.buffer_addr, usize::from(desc.length)));
            desc.status |= TxStatus::DD.bits() | self.state.borrow().tx_completion_errors;
            self.write_tx_desc(head, desc);
            self.set_reg(REG_TDH, ((head + 1) % count) as u32);
        }
        if !sent.is_empty() {
            self.raise(InterruptCause::TXDW);
        }
        sent
    }
}

impl Registers for SimNic {
    fn read_register(&mut self, offset: u32) -> u32 {
        let mut state = self.state.borrow_mut();
        state.reads.push(offset);
        match offset {
            REG_ICR => std::mem::take(&mut state.icr),
            REG_EERD => {
                if state.eerd_polls < state.eerd_latency {
                    state.eerd_polls += 1;
                    return state.eerd_request;
                }
                let request = state.eerd_request;
                match &state.eeprom {
                    Some(words) => {
                        let address = (request >> EERD_ADDR_SHIFT_EEPROM) & 0xff;
                        let data = u32::from(words[address as usize % words.len()]);
                        (data << EERD_DATA_SHIFT) | (address << 8) | EERD_DONE_EEPROM
                    }
                    None => {
                        let address = (request >> EERD_ADDR_SHIFT_FLASH) & 0x3f;
                        let data = u32::from(state.flash[address as usize]);
                        (data << EERD_DATA_SHIFT) | EERD_DONE_FLASH
                    }
                }
            }
            _ => state.regs[(offset / 4) as usize],
        }
    }

    fn write_register(&mut self, offset: u32, value: u32) {
        let mut state = self.state.borrow_mut();
        state.writes.push((offset, value));
        let slot = (offset / 4) as usize;
        match offset {
            REG_EERD => {
                state.eerd_request = value;
                state.eerd_polls = 0;
            }
            REG_ICS => state.icr |= value,
            REG_IMS => state.regs[(REG_IMS / 4) as usize] |= value,
            REG_IMC => state.regs[(REG_IMS / 4) as usize] &= !value,
            _ => state.regs[slot] = value,
        }
    }
}

pub fn test_frame(len: usize, seed: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, seed]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend((0..len.saturating_sub(14)).map(|i| (i as u8).wrapping_add(seed)));
    frame.truncate(len);
    frame
}
