use std::fmt;

use uio_dma::PageAllocator;

use crate::config::E1000Config;
use crate::desc::RX_BUFFER_LEN;
use crate::eeprom::{detect_eeprom, format_mac, read_mac, MacAddress};
use crate::error::{Error, Result};
use crate::regs::{
    InterruptCause, Registers, Status, REG_ICR, REG_IMC, REG_IMS, REG_MTA, REG_MTA_END,
    REG_RCTL, REG_STATUS, REG_TCTL,
};
use crate::ring::{RxRing, TxRing};
use crate::stats::{InterruptStats, RingStats};
use crate::wait::{Wake, WaitPolicy};

/// Causes `handle_interrupt` acts on; anything else is counted as unhandled.
const HANDLED_CAUSES: InterruptCause = InterruptCause::TXDW
    .union(InterruptCause::LSC)
    .union(InterruptCause::RXT0)
    .union(InterruptCause::RXO);

/// Bring-up progress, in the only order the transitions may happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BringUpState {
    Unmapped,
    Mapped,
    EepromProbed,
    MacRead,
    MulticastCleared,
    InterruptsDisabled,
    RxRingReady,
    TxRingReady,
    Operational,
}

impl fmt::Display for BringUpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn advance(state: &mut BringUpState, next: BringUpState) {
    debug_assert!(next > *state, "bring-up went from {state} back to {next}");
    tracing::debug!(from = %state, to = %next, "bring-up transition");
    *state = next;
}

/// One e1000 adapter driven from userspace.
///
/// Dropping the device disables receive and transmit and masks interrupts before the ring pages
/// are freed; the register window is released last.
pub struct E1000<R: Registers> {
    // Field order is drop order: rings before the register window.
    rx: RxRing,
    tx: TxRing,
    regs: R,
    name: String,
    config: E1000Config,
    has_eeprom: bool,
    mac: MacAddress,
    state: BringUpState,
    link_up: bool,
    rx_stats: RingStats,
    tx_stats: RingStats,
    irq_stats: InterruptStats,
    quiesced: bool,
}

impl<R: Registers> fmt::Debug for E1000<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("E1000")
            .field("name", &self.name)
            .field("mac", &format_mac(&self.mac))
            .field("has_eeprom", &self.has_eeprom)
            .field("state", &self.state)
            .field("rx_cursor", &self.rx.cursor())
            .field("tx_cursor", &self.tx.cursor())
            .finish_non_exhaustive()
    }
}

impl<R: Registers> E1000<R> {
    /// Runs the full bring-up sequence over an already mapped register window.
    ///
    /// `name` is the PCI identifier (bus:device.function) and is only used for logging.
    pub fn bring_up(
        name: impl Into<String>,
        mut regs: R,
        allocator: &PageAllocator,
        config: E1000Config,
    ) -> Result<Self> {
        let name = name.into();
        let span = tracing::info_span!("e1000", device = %name);
        let _enter = span.enter();

        config.validate()?;
        if allocator.page_size() < RX_BUFFER_LEN {
            return Err(Error::InvalidConfig("page size below the receive buffer size"));
        }

        let mut state = BringUpState::Unmapped;
        advance(&mut state, BringUpState::Mapped);

        let has_eeprom = detect_eeprom(&mut regs, config.eeprom_detect_retries);
        if !has_eeprom && config.require_eeprom {
            return Err(Error::EepromDetectTimeout {
                retries: config.eeprom_detect_retries,
            });
        }
        advance(&mut state, BringUpState::EepromProbed);

        let mac = read_mac(&mut regs, has_eeprom, config.eeprom_read_retries)?;
        advance(&mut state, BringUpState::MacRead);

        for offset in (REG_MTA..REG_MTA_END).step_by(4) {
            regs.write_register(offset, 0);
        }
        advance(&mut state, BringUpState::MulticastCleared);

        mask_interrupts(&mut regs);
        advance(&mut state, BringUpState::InterruptsDisabled);

        let rx = RxRing::new(&mut regs, allocator, config.rx_ring_size)?;
        advance(&mut state, BringUpState::RxRingReady);

        let tx = match TxRing::new(&mut regs, allocator, config.tx_ring_size) {
            Ok(tx) => tx,
            Err(err) => {
                // The receiver is already live on `rx`; stop it before its pages go away.
                regs.write_register(REG_RCTL, 0);
                return Err(err);
            }
        };
        advance(&mut state, BringUpState::TxRingReady);

        regs.write_register(REG_IMS, config.interrupt_mask.bits());
        advance(&mut state, BringUpState::Operational);

        let link_up = Status::from_bits_retain(regs.read_register(REG_STATUS)).contains(Status::LU);
        let mac_source = if has_eeprom { "eeprom" } else { "flash" };
        tracing::info!(
            mac = %format_mac(&mac),
            mac_source,
            link_up,
            "e1000 operational"
        );

        Ok(Self {
            rx,
            tx,
            regs,
            name,
            config,
            has_eeprom,
            mac,
            state,
            link_up,
            rx_stats: RingStats::default(),
            tx_stats: RingStats::default(),
            irq_stats: InterruptStats::default(),
            quiesced: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    pub fn has_eeprom(&self) -> bool {
        self.has_eeprom
    }

    pub fn state(&self) -> BringUpState {
        self.state
    }

    pub fn config(&self) -> &E1000Config {
        &self.config
    }

    /// Link state as of the last bring-up or link-change interrupt.
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Reads the link state from STATUS now.
    pub fn refresh_link(&mut self) -> bool {
        self.link_up =
            Status::from_bits_retain(self.regs.read_register(REG_STATUS)).contains(Status::LU);
        self.link_up
    }

    pub fn rx_ring(&self) -> &RxRing {
        &self.rx
    }

    pub fn tx_ring(&self) -> &TxRing {
        &self.tx
    }

    pub fn rx_stats(&self) -> RingStats {
        self.rx_stats
    }

    pub fn tx_stats(&self) -> RingStats {
        self.tx_stats
    }

    pub fn interrupt_stats(&self) -> InterruptStats {
        self.irq_stats
    }

    /// Replaces the enabled interrupt causes.
    pub fn set_interrupt_mask(&mut self, mask: InterruptCause) {
        self.regs.write_register(REG_IMC, (!mask).bits());
        self.regs.write_register(REG_IMS, mask.bits());
        self.config.interrupt_mask = mask;
    }

    /// Reads (and thereby acknowledges) ICR and acts on the handled causes.
    pub fn handle_interrupt(&mut self) -> InterruptCause {
        let causes = InterruptCause::from_bits_retain(self.regs.read_register(REG_ICR));
        if causes.contains(InterruptCause::TXDW) {
            self.irq_stats.tx_done += 1;
        }
        if causes.contains(InterruptCause::LSC) {
            self.irq_stats.link_changes += 1;
            let link_up = self.refresh_link();
            tracing::info!(device = %self.name, link_up, "link status changed");
        }
        if causes.contains(InterruptCause::RXT0) {
            self.irq_stats.rx_timer += 1;
        }
        if causes.contains(InterruptCause::RXO) {
            self.irq_stats.rx_overruns += 1;
            tracing::warn!(device = %self.name, "receive FIFO overrun, frames were dropped");
        }
        let unhandled = causes.difference(HANDLED_CAUSES);
        if !unhandled.is_empty() {
            self.irq_stats.unhandled += 1;
            tracing::debug!(device = %self.name, causes = ?unhandled, "unhandled interrupt causes");
        }
        causes
    }

    /// Copies the next received frame into `buf` without waiting.
    ///
    /// Returns [`Error::WouldBlock`] when the hardware has not completed the slot at the cursor.
    pub fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.rx.poll(&mut self.regs, buf) {
            Ok(len) => {
                self.rx_stats.record_packet(len);
                Ok(len)
            }
            Err(err) => {
                if matches!(err, Error::ReceiveHardwareError { .. }) {
                    self.rx_stats.record_error();
                }
                Err(err)
            }
        }
    }

    /// Like [`E1000::try_receive`], waiting through `wait` while no frame is ready.
    pub fn receive<W: WaitPolicy + ?Sized>(
        &mut self,
        buf: &mut [u8],
        wait: &mut W,
    ) -> Result<usize> {
        wait.reset();
        loop {
            match self.try_receive(buf) {
                Err(Error::WouldBlock) => self.wait_for_device(wait)?,
                other => return other,
            }
        }
    }

    /// Queues one already framed payload without waiting.
    ///
    /// Payloads of [`crate::MAX_TX_PAYLOAD`] + 1 bytes or more fail with
    /// [`Error::PayloadTooLarge`] before any register is touched.
    pub fn try_send(&mut self, payload: &[u8]) -> Result<()> {
        let submitted = self.tx.submit(&mut self.regs, payload)?;
        if !submitted.previous_errors.is_empty() {
            self.tx_stats.record_error();
        }
        self.tx_stats.record_packet(payload.len());
        Ok(())
    }

    pub fn send<W: WaitPolicy + ?Sized>(&mut self, payload: &[u8], wait: &mut W) -> Result<()> {
        wait.reset();
        loop {
            match self.try_send(payload) {
                Err(Error::WouldBlock) => self.wait_for_device(wait)?,
                other => return other,
            }
        }
    }

    fn wait_for_device<W: WaitPolicy + ?Sized>(&mut self, wait: &mut W) -> Result<()> {
        match wait.wait()? {
            Wake::Elapsed => Ok(()),
            Wake::Interrupt { count } => {
                tracing::trace!(count, "interrupt delivered");
                self.handle_interrupt();
                wait.rearm()
            }
        }
    }

    /// Stops the device and releases every ring page. Equivalent to dropping it.
    pub fn shutdown(mut self) {
        self.quiesce();
    }

    fn quiesce(&mut self) {
        if self.quiesced {
            return;
        }
        self.regs.write_register(REG_RCTL, 0);
        self.regs.write_register(REG_TCTL, 0);
        mask_interrupts(&mut self.regs);
        self.quiesced = true;
        tracing::info!(
            device = %self.name,
            rx_packets = self.rx_stats.packets,
            tx_packets = self.tx_stats.packets,
            "e1000 shut down"
        );
    }
}

impl<R: Registers> Drop for E1000<R> {
    fn drop(&mut self) {
        self.quiesce();
    }
}

/// Masks every cause and clears anything already latched in ICR.
fn mask_interrupts<R: Registers + ?Sized>(regs: &mut R) {
    regs.write_register(REG_IMC, u32::MAX);
    let _ = regs.read_register(REG_ICR);
}
