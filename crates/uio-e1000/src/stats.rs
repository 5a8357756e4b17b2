/// Per-direction counters.
///
/// `errors` counts receive hardware errors on RX and completions reporting EC/LC/TU on TX.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub packets: u64,
    pub bytes: u64,
    pub errors: u64,
}

impl RingStats {
    pub(crate) fn record_packet(&mut self, len: usize) {
        self.packets += 1;
        self.bytes += len as u64;
    }

    pub(crate) fn record_error(&mut self) {
        self.errors += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptStats {
    /// Transmit descriptor write-backs; these wake a blocked `send`.
    pub tx_done: u64,
    pub link_changes: u64,
    pub rx_timer: u64,
    pub rx_overruns: u64,
    /// ICR reads that carried causes outside the handled set.
    pub unhandled: u64,
}
