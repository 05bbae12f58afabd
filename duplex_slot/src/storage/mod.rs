//! Raw byte storage shared between the two endpoints.
//!
//! Backends only move bytes; mutual exclusion is the transport's job.

mod file;
mod mapped;
mod segment;

pub use file::FileStorage;
pub use mapped::MappedStorage;
pub use segment::SegmentStorage;

use std::sync::Arc;

use crate::HEADER_SIZE;
use crate::error::Result;

/// Byte storage holding the channel header and payload slot.
///
/// Writes must become visible to the peer process without any extra call
/// from the transport.
pub trait SlotStorage {
    /// Total size in bytes, header included.
    fn len(&self) -> usize;

    /// Fills `buf` with the bytes starting at `offset`.
    fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Overwrites `bytes.len()` bytes starting at `offset`.
    fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Snapshot of `len` bytes starting at `offset`.
    fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_region_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads a header word.
    fn load_word(&self, offset: usize) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.read_region_into(offset, &mut raw)?;
        Ok(i32::from_ne_bytes(raw))
    }

    /// Writes a header word. Must not be reordered before earlier
    /// `write_region` calls as seen by the peer.
    fn store_word(&self, offset: usize, value: i32) -> Result<()> {
        self.write_region(offset, &value.to_ne_bytes())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes available for a single message.
    fn payload_capacity(&self) -> usize {
        self.len().saturating_sub(HEADER_SIZE)
    }
}

macro_rules! forward_storage {
    ($($ty:ty),*) => {$(
        impl<T: SlotStorage + ?Sized> SlotStorage for $ty {
            fn len(&self) -> usize {
                (**self).len()
            }

            fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
                (**self).read_region_into(offset, buf)
            }

            fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()> {
                (**self).write_region(offset, bytes)
            }

            fn load_word(&self, offset: usize) -> Result<i32> {
                (**self).load_word(offset)
            }

            fn store_word(&self, offset: usize, value: i32) -> Result<()> {
                (**self).store_word(offset, value)
            }
        }
    )*};
}

forward_storage!(&T, Arc<T>, Box<T>);
