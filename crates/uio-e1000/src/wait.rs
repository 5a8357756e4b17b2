//! Waiting for descriptors that are not ready yet.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A backoff step or poll interval passed; the caller should re-check the ring.
    Elapsed,
    /// The device raised an interrupt. The driver acknowledges ICR before calling
    /// [`WaitPolicy::rearm`].
    Interrupt { count: u32 },
}

/// Strategy used by the blocking receive/send loops while a descriptor is owned by hardware.
pub trait WaitPolicy {
    fn wait(&mut self) -> Result<Wake>;

    /// Re-enables interrupt delivery after an [`Wake::Interrupt`] was handled.
    fn rearm(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once at the start of every blocking operation.
    fn reset(&mut self) {}
}

/// Cooperative cancellation flag shared between a waiter and whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn check(cancel: Option<&CancelToken>) -> Result<()> {
        match cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Tracks an optional overall deadline from the first wait of an operation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Deadline {
    timeout: Option<Duration>,
    started: Option<Instant>,
}

impl Deadline {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            started: None,
        }
    }

    pub(crate) fn check(&mut self) -> Result<()> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };
        let started = *self.started.get_or_insert_with(Instant::now);
        if started.elapsed() >= timeout {
            return Err(Error::WaitTimeout);
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.started = None;
    }
}

pub const DEFAULT_SPINS: u32 = 64;
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_micros(1);
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_micros(10);

/// Busy-polls for a few iterations, then sleeps with exponential backoff up to `max_sleep`.
#[derive(Debug, Clone)]
pub struct SpinWait {
    spins: u32,
    spun: u32,
    min_sleep: Duration,
    max_sleep: Duration,
    sleep: Duration,
    deadline: Deadline,
    cancel: Option<CancelToken>,
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinWait {
    pub fn new() -> Self {
        Self {
            spins: DEFAULT_SPINS,
            spun: 0,
            min_sleep: DEFAULT_MIN_SLEEP,
            max_sleep: DEFAULT_MAX_SLEEP,
            sleep: DEFAULT_MIN_SLEEP,
            deadline: Deadline::default(),
            cancel: None,
        }
    }

    pub fn with_spins(mut self, spins: u32) -> Self {
        self.spins = spins;
        self
    }

    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self.min_sleep = self.min_sleep.min(max_sleep);
        self.sleep = self.min_sleep;
        self
    }

    /// Fails the operation with [`Error::WaitTimeout`] once `timeout` has passed since its first
    /// wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::new(Some(timeout));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sleep the next backoff step would use.
    pub fn current_sleep(&self) -> Duration {
        self.sleep
    }
}

impl WaitPolicy for SpinWait {
    fn wait(&mut self) -> Result<Wake> {
        CancelToken::check(self.cancel.as_ref())?;
        self.deadline.check()?;
        if self.spun < self.spins {
            self.spun += 1;
            hint::spin_loop();
        } else {
            thread::sleep(self.sleep);
            self.sleep = (self.sleep * 2).min(self.max_sleep);
        }
        Ok(Wake::Elapsed)
    }

    fn reset(&mut self) {
        self.spun = 0;
        self.sleep = self.min_sleep;
        self.deadline.reset();
    }
}
