//! Interrupt delivery through a UIO device node (`/dev/uioN`).
//!
//! Reading the node blocks until an interrupt fires and yields a 4-byte native-endian event
//! count. Writing a 4-byte 1 or 0 enables or disables delivery.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::wait::{CancelToken, Deadline, Wake, WaitPolicy};

#[derive(Debug)]
pub struct UioInterrupt {
    file: File,
}

impl UioInterrupt {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    pub fn enable(&mut self) -> io::Result<()> {
        self.set_enabled(true)
    }

    pub fn disable(&mut self) -> io::Result<()> {
        self.set_enabled(false)
    }

    fn set_enabled(&mut self, enabled: bool) -> io::Result<()> {
        self.file.write_all(&i32::from(enabled).to_ne_bytes())
    }

    /// Waits up to `timeout` (forever if `None`) for an interrupt and returns the event count.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Option<u32>> {
        let timeout_ms = match timeout {
            Some(timeout) => i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // Safety: `pollfd` is a valid single-entry array for the duration of the call.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(None);
        }

        let mut count = [0u8; 4];
        self.file.read_exact(&mut count)?;
        Ok(Some(u32::from_ne_bytes(count)))
    }
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait policy blocking on the UIO node between ring checks.
#[derive(Debug)]
pub struct InterruptWait {
    uio: UioInterrupt,
    poll_interval: Duration,
    deadline: Deadline,
    cancel: Option<CancelToken>,
}

impl InterruptWait {
    /// Enables delivery on `uio` and wraps it.
    pub fn new(mut uio: UioInterrupt) -> Result<Self> {
        uio.enable().map_err(Error::Interrupt)?;
        Ok(Self {
            uio,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: Deadline::default(),
            cancel: None,
        })
    }

    /// Longest single block before the ring is re-checked.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::new(Some(timeout));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn into_inner(self) -> UioInterrupt {
        self.uio
    }
}

impl WaitPolicy for InterruptWait {
    fn wait(&mut self) -> Result<Wake> {
        CancelToken::check(self.cancel.as_ref())?;
        self.deadline.check()?;
        match self
            .uio
            .wait(Some(self.poll_interval))
            .map_err(Error::Interrupt)?
        {
            Some(count) => Ok(Wake::Interrupt { count }),
            None => Ok(Wake::Elapsed),
        }
    }

    fn rearm(&mut self) -> Result<()> {
        self.uio.enable().map_err(Error::Interrupt)
    }

    fn reset(&mut self) {
        self.deadline.reset();
    }
}

/// Background thread invoking a callback for every interrupt delivered on a UIO node.
///
/// Delivery is re-enabled after each callback. The thread stops and is joined when the listener
/// is dropped.
#[derive(Debug)]
pub struct InterruptListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptListener {
    pub fn spawn<F>(uio: UioInterrupt, callback: F) -> io::Result<Self>
    where
        F: FnMut(u32) + Send + 'static,
    {
        Self::spawn_with_interval(uio, DEFAULT_POLL_INTERVAL, callback)
    }

    /// Like [`InterruptListener::spawn`]; `interval` bounds how long a stop request may go
    /// unnoticed.
    pub fn spawn_with_interval<F>(
        mut uio: UioInterrupt,
        interval: Duration,
        mut callback: F,
    ) -> io::Result<Self>
    where
        F: FnMut(u32) + Send + 'static,
    {
        uio.enable()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("uio-e1000-irq".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    match uio.wait(Some(interval)) {
                        Ok(Some(count)) => {
                            callback(count);
                            if let Err(err) = uio.enable() {
                                tracing::warn!("re-enabling UIO interrupts failed: {err}");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!("UIO interrupt wait failed: {err}");
                            break;
                        }
                    }
                }
                tracing::debug!("interrupt listener stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("interrupt listener thread panicked");
            }
        }
    }
}

impl Drop for InterruptListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;

    /// A socket pair standing in for `/dev/uioN`: the returned stream plays the kernel side.
    fn fake_uio() -> (UioInterrupt, UnixStream) {
        let (driver, kernel) = UnixStream::pair().unwrap();
        (UioInterrupt::from_file(File::from(OwnedFd::from(driver))), kernel)
    }

    fn read_control_word(kernel: &mut UnixStream) -> i32 {
        let mut raw = [0u8; 4];
        kernel.read_exact(&mut raw).unwrap();
        i32::from_ne_bytes(raw)
    }

    #[test]
    fn enable_and_disable_write_native_ints() {
        let (mut uio, mut kernel) = fake_uio();
        uio.enable().unwrap();
        uio.disable().unwrap();
        assert_eq!(read_control_word(&mut kernel), 1);
        assert_eq!(read_control_word(&mut kernel), 0);
    }

    #[test]
    fn wait_returns_the_event_count() {
        let (mut uio, mut kernel) = fake_uio();
        assert_eq!(uio.wait(Some(Duration::from_millis(1))).unwrap(), None);
        kernel.write_all(&7u32.to_ne_bytes()).unwrap();
        assert_eq!(uio.wait(Some(Duration::from_secs(5))).unwrap(), Some(7));
    }

    #[test]
    fn interrupt_wait_rearms_after_delivery() {
        let (uio, mut kernel) = fake_uio();
        let mut wait = InterruptWait::new(uio)
            .unwrap()
            .with_poll_interval(Duration::from_millis(1));
        assert_eq!(read_control_word(&mut kernel), 1);

        assert_eq!(wait.wait().unwrap(), Wake::Elapsed);
        kernel.write_all(&3u32.to_ne_bytes()).unwrap();
        wait = wait.with_poll_interval(Duration::from_secs(5));
        assert_eq!(wait.wait().unwrap(), Wake::Interrupt { count: 3 });
        wait.rearm().unwrap();
        assert_eq!(read_control_word(&mut kernel), 1);
    }

    #[test]
    fn listener_runs_callback_and_stops_on_drop() {
        let (uio, mut kernel) = fake_uio();
        let (tx, rx) = mpsc::channel();
        let listener =
            InterruptListener::spawn_with_interval(uio, Duration::from_millis(5), move |count| {
                let _ = tx.send(count);
            })
            .unwrap();
        assert_eq!(read_control_word(&mut kernel), 1);

        kernel.write_all(&42u32.to_ne_bytes()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert_eq!(read_control_word(&mut kernel), 1);
        assert!(listener.is_running());

        drop(listener);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
