//! Fixed pool of receive slots drained by a single `recvmmsg` call.
//!
//! Every slot owns one heap buffer, the `iovec` describing it, storage for the
//! sender address, and the `mmsghdr` the kernel fills in. All of it is
//! allocated once in [`ReceivePool::new`] and never resized, so the pointers
//! wired between the arrays stay valid for the life of the pool.
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr;

use nix::errno::Errno;
use nix::libc;

use crate::error::{Error, Result};
use crate::utils::alloc_vec;

const ADDR_STORAGE_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_storage>() as _;

pub struct ReceivePool {
    buffers: Vec<Box<[u8]>>,
    iovecs: Vec<libc::iovec>,
    addrs: Vec<libc::sockaddr_storage>,
    headers: Vec<libc::mmsghdr>,
    buffer_bytes: usize,
    received: usize,
}

// SAFETY: the raw pointers inside `iovecs` and `headers` only point into heap
// memory owned by this same struct, which moves with it between threads.
unsafe impl Send for ReceivePool {}

impl ReceivePool {
    /// `slots` must fit the `recvmmsg` vector length and `buffer_bytes` the
    /// per-message byte count the kernel reports.
    pub fn new(slots: usize, buffer_bytes: usize) -> Result<Self> {
        if slots == 0 || libc::c_uint::try_from(slots).is_err() {
            return Err(Error::InvalidConfig(format!(
                "receive pool needs 1..={} slots, got {slots}",
                libc::c_uint::MAX
            )));
        }
        if u32::try_from(buffer_bytes).is_err() {
            return Err(Error::InvalidConfig(format!(
                "receive buffer of {buffer_bytes} bytes exceeds {}",
                u32::MAX
            )));
        }

        let mut buffers = alloc_vec::<Box<[u8]>>("receive slots", slots)?;
        for _ in 0..slots {
            let mut buf = alloc_vec::<u8>("receive buffer", buffer_bytes)?;
            buf.resize(buffer_bytes, 0);
            buffers.push(buf.into_boxed_slice());
        }

        let mut iovecs = alloc_vec::<libc::iovec>("receive iovecs", slots)?;
        for buf in buffers.iter_mut() {
            iovecs.push(libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            });
        }

        let mut addrs = alloc_vec::<libc::sockaddr_storage>("receive addresses", slots)?;
        // SAFETY: sockaddr_storage is plain data; all zeroes is AF_UNSPEC.
        addrs.resize_with(slots, || unsafe { mem::zeroed() });

        let mut headers = alloc_vec::<libc::mmsghdr>("receive headers", slots)?;
        for (iov, addr) in iovecs.iter_mut().zip(addrs.iter_mut()) {
            // SAFETY: mmsghdr is plain data; all zeroes is a valid empty header.
            let mut hdr: libc::mmsghdr = unsafe { mem::zeroed() };
            hdr.msg_hdr.msg_name = addr as *mut libc::sockaddr_storage as *mut libc::c_void;
            hdr.msg_hdr.msg_namelen = ADDR_STORAGE_LEN;
            hdr.msg_hdr.msg_iov = iov as *mut libc::iovec;
            hdr.msg_hdr.msg_iovlen = 1;
            headers.push(hdr);
        }

        Ok(Self {
            buffers,
            iovecs,
            addrs,
            headers,
            buffer_bytes,
            received: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.headers.len()
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    /// Number of slots filled by the last [`ReceivePool::receive`].
    pub fn received(&self) -> usize {
        self.received
    }

    /// Drains up to [`ReceivePool::capacity`] datagrams from `fd` in one call.
    ///
    /// Never blocks. `Ok(0)` means nothing was pending; any other kernel
    /// error is returned as is.
    pub fn receive(&mut self, fd: BorrowedFd<'_>) -> Result<usize> {
        for hdr in self.headers.iter_mut() {
            hdr.msg_hdr.msg_namelen = ADDR_STORAGE_LEN;
        }

        // SAFETY: every header points at an iovec and address slot owned by
        // self, and the iovecs point at buffers of the recorded length.
        let ret = unsafe {
            libc::recvmmsg(
                fd.as_raw_fd(),
                self.headers.as_mut_ptr(),
                self.headers.len() as libc::c_uint,
                libc::MSG_DONTWAIT as _,
                ptr::null_mut(),
            )
        };

        match Errno::result(ret) {
            Ok(n) => {
                self.received = n as usize;
                tracing::trace!(fd = fd.as_raw_fd(), count = self.received, "recvmmsg");
                Ok(self.received)
            }
            Err(Errno::EAGAIN) => {
                self.received = 0;
                Ok(0)
            }
            Err(e) => {
                self.received = 0;
                tracing::warn!(fd = fd.as_raw_fd(), errno = %e, "recvmmsg failed");
                Err(Error::syscall("recvmmsg")(e))
            }
        }
    }

    /// Byte count the kernel last recorded for `idx`. Slots at or past
    /// [`ReceivePool::received`] hold values from an earlier call.
    pub fn bytes_received(&self, idx: usize) -> Option<u32> {
        self.headers.get(idx).map(|hdr| hdr.msg_len)
    }

    pub fn buffer_address(&self, idx: usize) -> Option<*const u8> {
        self.iovecs.get(idx).map(|iov| iov.iov_base as *const u8)
    }

    /// Datagram delivered into slot `idx` by the last receive.
    pub fn datagram(&self, idx: usize) -> Option<Datagram<'_>> {
        if idx >= self.received {
            return None;
        }
        let hdr = &self.headers[idx];
        let len = (hdr.msg_len as usize).min(self.buffer_bytes);
        Some(Datagram {
            data: &self.buffers[idx][..len],
            source: sockaddr_to_std(&self.addrs[idx], hdr.msg_hdr.msg_namelen),
            truncated: hdr.msg_hdr.msg_flags & libc::MSG_TRUNC != 0,
        })
    }

    pub fn datagrams(&self) -> impl Iterator<Item = Datagram<'_>> + '_ {
        (0..self.received).filter_map(move |idx| self.datagram(idx))
    }
}

impl fmt::Debug for ReceivePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivePool")
            .field("slots", &self.capacity())
            .field("buffer_bytes", &self.buffer_bytes)
            .field("received", &self.received)
            .finish()
    }
}

/// Borrowed view of one received datagram. Lives until the next receive.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    data: &'a [u8],
    source: Option<SocketAddr>,
    truncated: bool,
}

impl<'a> Datagram<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Set when the datagram was larger than the slot and got cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

fn sockaddr_to_std(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET if len as usize >= mem::size_of::<libc::sockaddr_in>() => {
            // SAFETY: family and length say this is a sockaddr_in.
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 if len as usize >= mem::size_of::<libc::sockaddr_in6>() => {
            // SAFETY: family and length say this is a sockaddr_in6.
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
