//! The UDP sink loop: wait, dispatch by tag, drain sockets in batches.
//!
//! Tags are handed out here, on the caller side of the poller. Tag 1 is the
//! signalfd (when there is one) and every bound socket gets the next tag in
//! config order.
use std::{
    io,
    net::UdpSocket,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use mmpoll::{EpollFlags, Event, Poller, Result, SocketConf, Waker};
use nix::sys::{signal::Signal, signalfd::SignalFd};

const SIGNAL_TAG: u32 = 1;
const FIRST_SOCKET_TAG: u32 = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub batches: u64,
    pub datagrams: u64,
    pub bytes: u64,
}

/// Stops a running [`Sink`] from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Waker,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.signal()
    }
}

pub struct Sink {
    poller: Poller,
    signal_fd: Option<SignalFd>,
    sockets: Vec<UdpSocket>,
    shutdown: Arc<AtomicBool>,
    timeout_ms: i32,
    stats: Stats,
}

impl Sink {
    pub fn new(poller: Poller, timeout_ms: i32) -> Self {
        Self {
            poller,
            signal_fd: None,
            sockets: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            timeout_ms,
            stats: Stats::default(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: self.poller.waker(),
        }
    }

    pub fn watch_signals(&mut self, signal_fd: SignalFd) -> Result<()> {
        self.poller
            .register(&signal_fd, EpollFlags::EPOLLIN, SIGNAL_TAG)?;
        self.signal_fd = Some(signal_fd);
        Ok(())
    }

    /// Binds `conf` non-blocking and registers it. Returns the tag it got.
    pub fn bind(&mut self, conf: &SocketConf) -> Result<u32> {
        let socket = UdpSocket::bind(conf.bind)?;
        socket.set_nonblocking(true)?;
        self.add_socket(socket)
    }

    pub fn add_socket(&mut self, socket: UdpSocket) -> Result<u32> {
        let tag = FIRST_SOCKET_TAG + self.sockets.len() as u32;
        self.poller.register(&socket, EpollFlags::EPOLLIN, tag)?;
        tracing::info!(tag, addr = ?socket.local_addr().ok(), "listening");
        self.sockets.push(socket);
        Ok(tag)
    }

    /// Runs until a shutdown request or a termination signal arrives. A wait
    /// that times out just loops.
    pub fn run(&mut self) -> Result<Stats> {
        loop {
            let n = self.poller.wait(self.timeout_ms)?;
            for idx in 0..n {
                let Some(ev) = self.poller.ready().get(idx) else {
                    break;
                };
                if !self.handle_event(ev)? {
                    tracing::info!(stats = ?self.stats, "sink stopping");
                    return Ok(self.stats);
                }
            }
        }
    }

    fn handle_event(&mut self, ev: Event) -> Result<bool> {
        if ev.is_wake() {
            self.poller.clear_wake()?;
            return Ok(!self.shutdown.load(Ordering::Acquire));
        }

        if ev.tag() == SIGNAL_TAG {
            return self.handle_signal();
        }

        let idx = (ev.tag() - FIRST_SOCKET_TAG) as usize;
        if idx >= self.sockets.len() {
            tracing::warn!(tag = ev.tag(), "event for unknown tag");
            return Ok(true);
        }
        if ev.is_error() {
            let err = self.sockets[idx].take_error()?;
            tracing::warn!(tag = ev.tag(), ?err, "socket error");
        }
        if ev.is_readable() {
            self.drain(idx)?;
        }
        Ok(true)
    }

    fn handle_signal(&mut self) -> Result<bool> {
        let Some(signal_fd) = self.signal_fd.as_mut() else {
            return Ok(true);
        };
        match signal_fd.read_signal() {
            Ok(Some(info)) => match Signal::try_from(info.ssi_signo as i32) {
                Ok(Signal::SIGINT) | Ok(Signal::SIGTERM) => {
                    tracing::info!(signo = info.ssi_signo, "termination signal");
                    Ok(false)
                }
                _ => Ok(true),
            },
            Ok(None) => Ok(true),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }

    /// Reads batches until one comes back short of a full pool.
    fn drain(&mut self, idx: usize) -> Result<()> {
        let fd = self.sockets[idx].as_raw_fd();
        loop {
            let n = self.poller.receive_batch(&self.sockets[idx])?;
            if n == 0 {
                return Ok(());
            }
            self.stats.batches += 1;
            self.stats.datagrams += n as u64;
            for dgram in self.poller.datagrams() {
                self.stats.bytes += dgram.len() as u64;
                tracing::debug!(
                    fd,
                    len = dgram.len(),
                    source = ?dgram.source(),
                    truncated = dgram.is_truncated(),
                    "datagram"
                );
            }
            if n < self.poller.max_datagrams() {
                return Ok(());
            }
        }
    }
}
