//! Error type shared by the storage backends and the transport.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::transport::Side;

/// Result alias for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Underlying OS failure (open, mmap, shmget, shmat, pread, ...).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Access past the end of the storage.
    #[error("region {offset}..{end} out of bounds (storage is {len} bytes)", end = .offset + .size)]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    /// Header word accessed at an offset that is not 4-byte aligned.
    #[error("header word at offset {offset} is not 4-byte aligned")]
    Misaligned { offset: usize },

    /// Message does not fit in the payload slot.
    #[error("payload of {len} bytes exceeds slot capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// Empty messages are reserved as the responder stop signal.
    #[error("empty payloads cannot be written")]
    EmptyPayload,

    /// Endpoint ids are 0 or 1.
    #[error("invalid endpoint id {0}, expected 0 or 1")]
    InvalidEndpointId(i32),

    /// A side was requested twice from the same channel.
    #[error("endpoint {0} is already bound to this channel")]
    EndpointTaken(Side),

    /// A bounded wait expired before the peer made progress.
    #[error("peer unresponsive after {waited:?}")]
    PeerUnresponsive { waited: Duration },

    /// `pending_size` holds a value the protocol never writes.
    #[error("corrupt channel header: pending_size = {pending_size}")]
    CorruptHeader { pending_size: i32 },
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(io::Error::from_raw_os_error(e as i32))
    }
}
