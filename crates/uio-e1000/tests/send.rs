mod common;

use common::{allocator, test_frame, SimNic};
use uio_e1000::regs::*;
use uio_e1000::{E1000Config, Error, Wake, WaitPolicy, MAX_TX_PAYLOAD};

#[test]
fn send_fills_the_slot_and_kicks_the_tail() {
    let dma = allocator(128);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config::default());
    nic.clear_log();

    let frame = test_frame(42, 9);
    dev.try_send(&frame).unwrap();

    let desc = nic.read_tx_desc(0);
    assert_eq!(usize::from(desc.length), frame.len());
    assert_eq!(desc.cmd, 0x1B);
    assert_eq!(desc.status, 0);
    assert_eq!(nic.read_buffer(desc.buffer_addr, frame.len()), frame);
    assert_eq!(nic.writes_to(REG_TDT), vec![1]);
    assert_eq!(dev.tx_ring().cursor(), 1);

    assert_eq!(nic.complete_tx(), vec![frame]);
    assert!(TxStatus::from_bits_retain(nic.read_tx_desc(0).status).contains(TxStatus::DD));
    assert_eq!(dev.tx_stats().packets, 1);
    assert_eq!(dev.tx_stats().bytes, 42);
}

#[test]
fn payload_size_limit_is_checked_before_hardware_access() {
    let dma = allocator(128);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config::default());
    nic.clear_log();

    let err = dev.try_send(&vec![0u8; 2048]).unwrap_err();
    assert!(matches!(
        err,
        Error::PayloadTooLarge {
            len: 2048,
            max: 2047
        }
    ));
    assert!(nic.state.borrow().writes.is_empty());
    assert_eq!(dev.tx_ring().cursor(), 0);

    assert_eq!(MAX_TX_PAYLOAD, 2047);
    dev.try_send(&vec![0x5Au8; 2047]).unwrap();
    assert_eq!(
        nic.complete_tx(),
        vec![vec![0x5Au8; 2047]],
        "the largest legal payload goes out intact"
    );
}

#[test]
fn ring_keeps_one_slot_between_tail_and_head() {
    let dma = allocator(64);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..E1000Config::default()
    });

    for seed in 0..7 {
        dev.try_send(&test_frame(60, seed)).unwrap();
    }
    assert_eq!(dev.tx_ring().cursor(), 7);
    nic.clear_log();
    // Queueing an eighth frame would move TDT onto TDH.
    assert!(dev.try_send(&test_frame(60, 7)).unwrap_err().is_would_block());
    assert!(nic.state.borrow().writes.is_empty());

    let sent = nic.complete_tx();
    assert_eq!(sent.len(), 7);
    dev.try_send(&test_frame(60, 7)).unwrap();
    assert_eq!(nic.writes_to(REG_TDT), vec![0]);
    assert_eq!(nic.complete_tx(), vec![test_frame(60, 7)]);
}

#[test]
fn slot_still_owned_by_hardware_would_block() {
    let dma = allocator(64);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..E1000Config::default()
    });

    for seed in 0..7 {
        dev.try_send(&test_frame(60, seed)).unwrap();
    }
    nic.complete_tx();
    dev.try_send(&test_frame(60, 7)).unwrap();
    // Slot 0 completed; make it look in flight again.
    let mut desc = nic.read_tx_desc(0);
    desc.status = 0;
    let (base, _) = nic.tx_ring();
    dma.write_physical(uio_dma::PhysicalAddress(base), &desc.to_bytes())
        .unwrap();
    assert!(dev.try_send(&test_frame(60, 8)).unwrap_err().is_would_block());
    assert_eq!(dev.tx_ring().cursor(), 0);
}

#[test]
fn completion_errors_are_counted_on_slot_reuse() {
    let dma = allocator(64);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..E1000Config::default()
    });
    nic.state.borrow_mut().tx_completion_errors = TxStatus::LC.bits();

    for seed in 0..7 {
        dev.try_send(&test_frame(60, seed)).unwrap();
    }
    nic.complete_tx();
    // Slot 7 has never carried a frame.
    dev.try_send(&test_frame(60, 7)).unwrap();
    assert_eq!(dev.tx_stats().errors, 0);

    // Reusing slot 0 observes the late collision its previous frame reported.
    dev.try_send(&test_frame(60, 8)).unwrap();
    assert_eq!(dev.tx_stats().errors, 1);
    assert_eq!(dev.tx_stats().packets, 9);
}

struct CompleteOnWait<'a> {
    nic: &'a SimNic,
    waits: u32,
}

impl WaitPolicy for CompleteOnWait<'_> {
    fn wait(&mut self) -> uio_e1000::Result<Wake> {
        self.waits += 1;
        self.nic.complete_tx();
        Ok(Wake::Elapsed)
    }
}

#[test]
fn blocking_send_waits_for_the_slot_to_complete() {
    let dma = allocator(64);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..E1000Config::default()
    });
    let mut wait = CompleteOnWait { nic: &nic, waits: 0 };

    for seed in 0..7 {
        dev.send(&test_frame(60, seed), &mut wait).unwrap();
    }
    assert_eq!(wait.waits, 0);
    dev.send(&test_frame(60, 7), &mut wait).unwrap();
    assert_eq!(wait.waits, 1);
    assert_eq!(dev.tx_ring().cursor(), 0);
}

/// Completes the ring and reports the write-back as an interrupt.
struct TxDoneInterrupt<'a> {
    nic: &'a SimNic,
    rearms: u32,
}

impl WaitPolicy for TxDoneInterrupt<'_> {
    fn wait(&mut self) -> uio_e1000::Result<Wake> {
        self.nic.complete_tx();
        Ok(Wake::Interrupt { count: 1 })
    }

    fn rearm(&mut self) -> uio_e1000::Result<()> {
        self.rearms += 1;
        Ok(())
    }
}

#[test]
fn blocking_send_wakes_on_transmit_write_back() {
    let dma = allocator(64);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..E1000Config::default()
    });
    assert!(dev.config().interrupt_mask.contains(InterruptCause::TXDW));
    assert_ne!(nic.reg(REG_IMS) & InterruptCause::TXDW.bits(), 0);

    for seed in 0..7 {
        dev.try_send(&test_frame(60, seed)).unwrap();
    }
    let mut wait = TxDoneInterrupt { nic: &nic, rearms: 0 };
    dev.send(&test_frame(60, 7), &mut wait).unwrap();

    assert_eq!(wait.rearms, 1);
    assert_eq!(dev.interrupt_stats().tx_done, 1);
    assert_eq!(dev.interrupt_stats().unhandled, 0);
    assert_eq!(dev.tx_ring().cursor(), 0);
}

#[test]
fn oversized_blocking_send_fails_without_waiting() {
    let dma = allocator(128);
    let nic = SimNic::new(&dma);
    let mut dev = nic.bring_up(E1000Config::default());
    let mut wait = CompleteOnWait { nic: &nic, waits: 0 };
    assert!(matches!(
        dev.send(&[0u8; 4000], &mut wait),
        Err(Error::PayloadTooLarge { len: 4000, .. })
    ));
    assert_eq!(wait.waits, 0);
}
