//! Cross-thread wake channel backed by an `eventfd`.
//!
//! The counter is read in non-semaphore mode, so any number of signals
//! between two clears collapse into a single pending wake. The descriptor is
//! non-blocking: signalling a saturated counter and clearing an empty one are
//! both no-ops rather than stalls.
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::error::{Error, Result};

/// The wake channel owned by a [`crate::Poller`].
#[derive(Debug)]
pub struct WakeChannel {
    fd: Arc<EventFd>,
}

impl WakeChannel {
    pub fn new() -> Result<Self> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(|e| Error::acquire("eventfd", e))?;
        Ok(Self { fd: Arc::new(fd) })
    }

    pub fn waker(&self) -> Waker {
        Waker {
            fd: Arc::clone(&self.fd),
        }
    }

    pub fn signal(&self) -> Result<()> {
        signal(&self.fd)
    }

    /// Consumes the pending wake. Returns `false` if nothing was pending.
    pub fn clear(&self) -> Result<bool> {
        match self.fd.read() {
            Ok(count) => {
                tracing::trace!(count, "wake channel cleared");
                Ok(true)
            }
            Err(Errno::EAGAIN) => Ok(false),
            Err(e) => Err(Error::syscall("eventfd read")(e)),
        }
    }
}

impl AsFd for WakeChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for WakeChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// A handle other threads use to interrupt a blocked `wait`.
///
/// Holding a `Waker` keeps the eventfd open even after the poller is dropped;
/// signalling it then has no observer but is harmless.
#[derive(Debug, Clone)]
pub struct Waker {
    fd: Arc<EventFd>,
}

impl Waker {
    pub fn signal(&self) -> Result<()> {
        signal(&self.fd)
    }
}

fn signal(fd: &EventFd) -> Result<()> {
    match fd.write(1) {
        Ok(_) => {
            tracing::trace!("wake channel signalled");
            Ok(())
        }
        // counter saturated: a wake is already pending
        Err(Errno::EAGAIN) => Ok(()),
        Err(e) => Err(Error::syscall("eventfd write")(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clear_without_signal() {
        let chan = WakeChannel::new().unwrap();
        assert!(!chan.clear().unwrap());
    }

    #[test]
    fn test_signals_coalesce() {
        let chan = WakeChannel::new().unwrap();
        chan.signal().unwrap();
        chan.signal().unwrap();
        chan.waker().signal().unwrap();

        assert!(chan.clear().unwrap());
        assert!(!chan.clear().unwrap());
    }

    #[test]
    fn test_waker_from_other_thread() {
        let chan = WakeChannel::new().unwrap();
        let waker = chan.waker();
        thread::spawn(move || waker.signal().unwrap())
            .join()
            .unwrap();
        assert!(chan.clear().unwrap());
    }

    #[test]
    fn test_waker_outlives_channel() {
        let chan = WakeChannel::new().unwrap();
        let waker = chan.waker();
        drop(chan);
        waker.signal().unwrap();
    }
}
