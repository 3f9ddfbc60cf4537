//! Readiness polling with a built-in batched datagram receive pool.
//!
//! A [`Poller`] owns one epoll instance, an eventfd wake channel registered
//! under the reserved [`WAKE_TAG`], a fixed event array, and a fixed pool of
//! receive slots filled by `recvmmsg`. Results are read in place: either
//! through the borrowed views ([`ReadyEvents`], [`Datagram`]) or, for callers
//! that overlay their own layout, through the raw addresses and the record
//! layout constants.
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use mmpoll::{EpollFlags, Poller};
//!
//! let sock = UdpSocket::bind("127.0.0.1:9000")?;
//! let mut poller = Poller::new(64, 32, 2048)?;
//! poller.register(&sock, EpollFlags::EPOLLIN, 1)?;
//!
//! poller.wait(-1)?;
//! for ev in poller.ready() {
//!     if ev.is_wake() {
//!         poller.clear_wake()?;
//!     }
//! }
//! let n = poller.receive_batch(&sock)?;
//! for dgram in poller.datagrams() {
//!     println!("{} bytes from {:?}", dgram.len(), dgram.source());
//! }
//! # let _ = n;
//! # Ok::<(), mmpoll::Error>(())
//! ```
#[cfg(not(target_os = "linux"))]
compile_error!("mmpoll requires Linux: it is built on epoll, eventfd and recvmmsg");

pub mod conf;
pub mod error;
pub mod event;
pub mod poller;
pub mod pool;
pub mod utils;
pub mod wake;

pub use conf::{Config, PollerConf, SocketConf};
pub use error::{Error, Result};
pub use event::{
    event_record_size, Event, ReadyEvents, EVENT_READINESS_OFFSET, EVENT_RECORD_SIZE,
    EVENT_TAG_OFFSET, WAKE_TAG,
};
pub use nix::sys::epoll::EpollFlags;
pub use poller::{Ctl, Poller};
pub use pool::{Datagram, ReceivePool};
pub use wake::{WakeChannel, Waker};
