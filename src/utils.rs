use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::os::fd::RawFd;

use crate::error::{Error, Result};

pub fn set_fd_nonblocking(fd: RawFd) -> nix::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let prev_flags = OFlag::from_bits_truncate(bits);
    fcntl(fd, FcntlArg::F_SETFL(prev_flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// An empty vector with room for exactly `len` items, or an exhaustion error
/// instead of an allocator abort.
pub(crate) fn alloc_vec<T>(what: &'static str, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhaustion {
            what,
            source: Errno::ENOMEM,
        })?;
    Ok(v)
}
