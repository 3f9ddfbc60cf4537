//! The poller bundles one epoll instance, its wake channel, the reusable event
//! array and the receive pool into a single owned value.
//!
//! Creation wires the wake channel in under [`WAKE_TAG`]; if any step fails
//! the pieces already built are dropped on the way out. Teardown is `Drop`: the struct fields are declared so the
//! epoll and eventfd descriptors close before the event array and receive
//! buffers are freed.
//!
//! A single thread drives `wait`, `control` and `receive_batch`. Other threads
//! only ever touch the poller through a [`Waker`].
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::conf::PollerConf;
use crate::error::{Error, Result};
use crate::event::{self, ReadyEvents, WAKE_TAG};
use crate::pool::{Datagram, ReceivePool};
use crate::utils::alloc_vec;
use crate::wake::{WakeChannel, Waker};

/// Operation applied to the interest set by [`Poller::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctl {
    Add,
    Modify,
    Remove,
}

pub struct Poller {
    epoll: Epoll,
    wake: WakeChannel,
    events: Box<[EpollEvent]>,
    ready: usize,
    pool: ReceivePool,
}

impl Poller {
    pub fn new(max_events: usize, max_datagrams: usize, read_buffer_bytes: usize) -> Result<Self> {
        Self::from_conf(&PollerConf {
            max_events,
            max_datagrams,
            read_buffer_bytes,
        })
    }

    pub fn from_conf(conf: &PollerConf) -> Result<Self> {
        conf.validate()?;

        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| Error::acquire("epoll_create1", e))?;

        let mut events = alloc_vec::<EpollEvent>("event array", conf.max_events)?;
        events.resize(conf.max_events, EpollEvent::empty());

        let wake = WakeChannel::new()?;
        epoll
            .add(
                &wake,
                event::encode(
                    EpollFlags::EPOLLIN | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP,
                    WAKE_TAG,
                ),
            )
            .map_err(|e| Error::acquire("epoll_ctl(ADD wake)", e))?;

        let pool = ReceivePool::new(conf.max_datagrams, conf.read_buffer_bytes)?;

        tracing::debug!(
            epoll_fd = epoll.0.as_raw_fd(),
            wake_fd = wake.as_raw_fd(),
            max_events = conf.max_events,
            max_datagrams = conf.max_datagrams,
            read_buffer_bytes = conf.read_buffer_bytes,
            "poller created"
        );

        Ok(Self {
            epoll,
            wake,
            events: events.into_boxed_slice(),
            ready: 0,
            pool,
        })
    }

    /// Explicit teardown. Equivalent to dropping the poller.
    ///
    /// Closes the epoll descriptor and frees the event array and the receive
    /// pool. The eventfd is shared with every [`Waker`] handed out by
    /// [`Poller::waker`], so it closes only once the last of them is dropped.
    /// Signalling such a waker after teardown succeeds and has no effect.
    pub fn destroy(self) {}

    pub fn max_events(&self) -> usize {
        self.events.len()
    }

    pub fn max_datagrams(&self) -> usize {
        self.pool.capacity()
    }

    pub fn read_buffer_bytes(&self) -> usize {
        self.pool.buffer_bytes()
    }

    pub fn control(&self, op: Ctl, fd: BorrowedFd<'_>, readiness: EpollFlags, tag: u32) -> Result<()> {
        match op {
            Ctl::Add => self.register(fd, readiness, tag),
            Ctl::Modify => self.modify(fd, readiness, tag),
            Ctl::Remove => self.unregister(fd),
        }
    }

    /// Adds `fd` to the interest set. Events for it carry `tag`, which must
    /// not be [`WAKE_TAG`].
    pub fn register<F: AsFd>(&self, fd: F, readiness: EpollFlags, tag: u32) -> Result<()> {
        check_tag(tag)?;
        let raw = fd.as_fd().as_raw_fd();
        self.epoll
            .add(fd, event::encode(readiness, tag))
            .map_err(|e| Error::acquire("epoll_ctl(ADD)", e))?;
        tracing::debug!(fd = raw, tag, ?readiness, "registered");
        Ok(())
    }

    pub fn modify<F: AsFd>(&self, fd: F, readiness: EpollFlags, tag: u32) -> Result<()> {
        check_tag(tag)?;
        let raw = fd.as_fd().as_raw_fd();
        let mut ev = event::encode(readiness, tag);
        self.epoll
            .modify(fd, &mut ev)
            .map_err(Error::syscall("epoll_ctl(MOD)"))?;
        tracing::debug!(fd = raw, tag, ?readiness, "modified");
        Ok(())
    }

    pub fn unregister<F: AsFd>(&self, fd: F) -> Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        self.epoll
            .delete(fd)
            .map_err(Error::syscall("epoll_ctl(DEL)"))?;
        tracing::debug!(fd = raw, "unregistered");
        Ok(())
    }

    /// Blocks until a registered descriptor is ready, the wake channel fires,
    /// or `timeout_ms` passes. Zero polls, negative blocks without limit.
    ///
    /// Overwrites the event array from index 0 and returns how many entries
    /// were written. A pending wake is level triggered: until
    /// [`Poller::clear_wake`] is called every wait returns at once.
    pub fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        let timeout = match timeout_ms {
            t if t < 0 => EpollTimeout::NONE,
            0 => EpollTimeout::ZERO,
            t => EpollTimeout::try_from(Duration::from_millis(t as u64))
                .map_err(|_| Error::InvalidConfig(format!("timeout {t}ms out of range")))?,
        };

        self.ready = 0;
        let n = self
            .epoll
            .wait(&mut self.events, timeout)
            .map_err(Error::syscall("epoll_wait"))?;
        self.ready = n;
        tracing::trace!(ready = n, "wait returned");
        Ok(n)
    }

    /// Entries from the last [`Poller::wait`].
    pub fn ready(&self) -> ReadyEvents<'_> {
        ReadyEvents::new(&self.events[..self.ready])
    }

    pub fn last_ready(&self) -> usize {
        self.ready
    }

    /// Start of the raw event array. Records are
    /// [`crate::EVENT_RECORD_SIZE`] bytes apart and stay valid until the poller
    /// is dropped; contents change on every `wait`.
    pub fn event_array_address(&self) -> *const u8 {
        self.events.as_ptr() as *const u8
    }

    pub fn waker(&self) -> Waker {
        self.wake.waker()
    }

    pub fn signal(&self) -> Result<()> {
        self.wake.signal()
    }

    /// Consumes a pending wake. Returns `false` if none was pending.
    pub fn clear_wake(&self) -> Result<bool> {
        self.wake.clear()
    }

    /// Drains up to [`Poller::max_datagrams`] datagrams from `fd` into the
    /// receive pool, slot 0 first. Never blocks; `Ok(0)` means nothing was
    /// pending.
    pub fn receive_batch<F: AsFd>(&mut self, fd: F) -> Result<usize> {
        self.pool.receive(fd.as_fd())
    }

    pub fn datagram(&self, idx: usize) -> Option<Datagram<'_>> {
        self.pool.datagram(idx)
    }

    pub fn datagrams(&self) -> impl Iterator<Item = Datagram<'_>> + '_ {
        self.pool.datagrams()
    }

    /// Byte count last written to slot `idx`, stale for slots past the most
    /// recent batch.
    pub fn bytes_received(&self, idx: usize) -> Option<u32> {
        self.pool.bytes_received(idx)
    }

    pub fn buffer_address(&self, idx: usize) -> Option<*const u8> {
        self.pool.buffer_address(idx)
    }
}

fn check_tag(tag: u32) -> Result<()> {
    if tag == WAKE_TAG {
        return Err(Error::ReservedTag(tag));
    }
    Ok(())
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.0.as_raw_fd()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        tracing::debug!(
            epoll_fd = self.epoll.0.as_raw_fd(),
            wake_fd = self.wake.as_raw_fd(),
            "poller torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use std::net::UdpSocket;
    use std::os::fd::AsFd;

    #[test]
    fn test_create_reports_sizes() {
        let poller = Poller::new(8, 4, 512).unwrap();
        assert_eq!(poller.max_events(), 8);
        assert_eq!(poller.max_datagrams(), 4);
        assert_eq!(poller.read_buffer_bytes(), 512);
        assert_eq!(poller.last_ready(), 0);
        assert!(poller.ready().is_empty());
    }

    #[test]
    fn test_create_rejects_zero_sizes() {
        assert!(matches!(Poller::new(0, 1, 1), Err(Error::InvalidConfig(_))));
        assert!(matches!(Poller::new(1, 0, 1), Err(Error::InvalidConfig(_))));
        assert!(matches!(Poller::new(1, 1, 0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_wait_zero_timeout_is_empty() {
        let mut poller = Poller::new(4, 1, 64).unwrap();
        assert_eq!(poller.wait(0).unwrap(), 0);
    }

    #[test]
    fn test_reserved_tag_rejected() {
        let poller = Poller::new(4, 1, 64).unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        assert!(matches!(
            poller.register(&sock, EpollFlags::EPOLLIN, WAKE_TAG),
            Err(Error::ReservedTag(0))
        ));
        poller.register(&sock, EpollFlags::EPOLLIN, 1).unwrap();
        assert!(matches!(
            poller.modify(&sock, EpollFlags::EPOLLIN, WAKE_TAG),
            Err(Error::ReservedTag(0))
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_descriptors() {
        let poller = Poller::new(4, 1, 64).unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let other = UdpSocket::bind("127.0.0.1:0").unwrap();

        poller.register(&sock, EpollFlags::EPOLLIN, 3).unwrap();
        let err = poller.register(&sock, EpollFlags::EPOLLIN, 3).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EEXIST));

        let err = poller.modify(&other, EpollFlags::EPOLLIN, 4).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
        let err = poller.unregister(&other).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_control_dispatches() {
        let poller = Poller::new(4, 1, 64).unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        poller
            .control(Ctl::Add, sock.as_fd(), EpollFlags::EPOLLIN, 9)
            .unwrap();
        poller
            .control(Ctl::Modify, sock.as_fd(), EpollFlags::EPOLLOUT, 9)
            .unwrap();
        poller
            .control(Ctl::Remove, sock.as_fd(), EpollFlags::empty(), 9)
            .unwrap();
    }

    #[test]
    fn test_signal_then_clear() {
        let mut poller = Poller::new(4, 1, 64).unwrap();
        poller.signal().unwrap();
        assert_eq!(poller.wait(0).unwrap(), 1);
        assert!(poller.ready().has_wake());
        assert!(poller.clear_wake().unwrap());
        assert_eq!(poller.wait(0).unwrap(), 0);
    }

    #[test]
    fn test_event_array_address_tracks_buffer() {
        let mut poller = Poller::new(2, 1, 64).unwrap();
        let before = poller.event_array_address();
        poller.signal().unwrap();
        poller.wait(0).unwrap();
        assert_eq!(before, poller.event_array_address());

        let tag = unsafe {
            std::ptr::read_unaligned(before.add(crate::EVENT_TAG_OFFSET) as *const u32)
        };
        assert_eq!(tag, WAKE_TAG);
    }
}
