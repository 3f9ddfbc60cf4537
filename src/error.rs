//! Error taxonomy for the poller.
//!
//! Every failure reported by the kernel is carried verbatim as an [`Errno`]
//! together with the name of the call that produced it. Nothing here is
//! retried; the caller decides what a failure means for its session.
use std::io;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Memory or descriptor allocation failed while building state.
    #[error("resource exhausted allocating {what}: {source}")]
    ResourceExhaustion {
        what: &'static str,
        #[source]
        source: Errno,
    },

    /// An OS primitive reported an error.
    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: Errno,
    },

    /// The tag is reserved for the wake channel.
    #[error("tag {0} is reserved for the wake channel")]
    ReservedTag(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Classifies a failed call that acquires kernel resources. Running out
    /// of descriptors, memory or watch slots is exhaustion; anything else is a
    /// plain syscall failure.
    pub(crate) fn acquire(what: &'static str, errno: Errno) -> Self {
        match errno {
            Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM | Errno::ENOBUFS | Errno::ENOSPC => {
                Error::ResourceExhaustion {
                    what,
                    source: errno,
                }
            }
            source => Error::Syscall { call: what, source },
        }
    }

    pub(crate) fn syscall(call: &'static str) -> impl FnOnce(Errno) -> Self {
        move |source| Error::Syscall { call, source }
    }

    /// The raw errno behind this error, if it came from the OS.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::ResourceExhaustion { source, .. } | Error::Syscall { source, .. } => {
                Some(*source)
            }
            Error::Io(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }
}
