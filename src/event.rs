//! Readiness records and the borrowed view over the last `wait` result.
//!
//! The event array is a plain `epoll_event` array owned by the poller. The
//! layout constants below let a caller overlay its own view onto the raw
//! memory returned by [`crate::Poller::event_array_address`]; the tag lives in
//! the low 32 bits of the kernel's 64-bit user data word.
use std::mem;

use nix::libc;
use nix::sys::epoll::{EpollEvent, EpollFlags};

/// Tag under which the wake channel is registered. Never handed to callers.
pub const WAKE_TAG: u32 = 0;

/// Size in bytes of one record in the event array.
pub const EVENT_RECORD_SIZE: usize = mem::size_of::<libc::epoll_event>();

/// Byte offset of the 32-bit readiness mask within a record.
pub const EVENT_READINESS_OFFSET: usize = mem::offset_of!(libc::epoll_event, events);

/// Byte offset of the 32-bit tag within a record.
pub const EVENT_TAG_OFFSET: usize = mem::offset_of!(libc::epoll_event, u64) + TAG_WORD_SHIFT;

#[cfg(target_endian = "little")]
const TAG_WORD_SHIFT: usize = 0;

#[cfg(target_endian = "big")]
const TAG_WORD_SHIFT: usize = 4;

pub fn event_record_size() -> usize {
    EVENT_RECORD_SIZE
}

pub(crate) fn encode(readiness: EpollFlags, tag: u32) -> EpollEvent {
    EpollEvent::new(readiness, tag as u64)
}

/// One ready entry, decoded from the event array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    readiness: EpollFlags,
    tag: u32,
}

impl Event {
    fn decode(raw: &EpollEvent) -> Self {
        Self {
            readiness: raw.events(),
            tag: raw.data() as u32,
        }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn readiness(&self) -> EpollFlags {
        self.readiness
    }

    /// True when this entry is the wake channel firing.
    pub fn is_wake(&self) -> bool {
        self.tag == WAKE_TAG
    }

    pub fn is_readable(&self) -> bool {
        self.readiness.contains(EpollFlags::EPOLLIN)
    }

    pub fn is_writable(&self) -> bool {
        self.readiness.contains(EpollFlags::EPOLLOUT)
    }

    pub fn is_error(&self) -> bool {
        self.readiness.contains(EpollFlags::EPOLLERR)
    }

    pub fn is_hangup(&self) -> bool {
        self.readiness
            .intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP)
    }
}

/// Entries written by the most recent `wait`. Valid until the next call that
/// takes the poller mutably.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvents<'a> {
    raw: &'a [EpollEvent],
}

impl<'a> ReadyEvents<'a> {
    pub(crate) fn new(raw: &'a [EpollEvent]) -> Self {
        Self { raw }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Event> {
        self.raw.get(idx).map(Event::decode)
    }

    /// Whether the wake channel is among the ready entries.
    pub fn has_wake(&self) -> bool {
        self.iter().any(|ev| ev.is_wake())
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + 'a {
        self.raw.iter().map(Event::decode)
    }
}

impl<'a> IntoIterator for ReadyEvents<'a> {
    type Item = Event;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, EpollEvent>, fn(&EpollEvent) -> Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.raw.iter().map(Event::decode as fn(&EpollEvent) -> Event)
    }
}
