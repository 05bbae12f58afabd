//! Single-slot duplex byte channel shared by exactly two processes.
//!
//! The channel is a fixed header followed by one payload slot:
//!
//! ```text
//!   Offset 0:  owner         (i32)  side that last wrote or consumed the slot
//!   Offset 4:  pending_size  (i32)  0 = free, -1 = closed, >0 = bytes pending
//!   Offset 8:  payload       (N)    the pending message
//! ```
//!
//! The same [`Endpoint`] state machine runs over every [`SlotStorage`]
//! backend:
//! - [`FileStorage`]: positional reads/writes on a regular file
//! - [`MappedStorage`]: anonymous `MAP_SHARED` mapping inherited across `fork`
//! - [`SegmentStorage`]: System-V segment, attached and detached per access
//!
//! All waiting is busy polling (see [`poll`]); backends never lock.

pub mod error;
pub mod poll;
pub mod storage;
pub mod transport;
pub mod view;

pub use error::{Error, Result};
pub use poll::{Backoff, PollPolicy, Poller};
pub use storage::{FileStorage, MappedStorage, SegmentStorage, SlotStorage};
pub use transport::{Channel, Endpoint, EndpointState, Side};
pub use view::SharedView;

/// Byte offset of the `owner` word.
pub const OWNER_OFFSET: usize = 0;
/// Byte offset of the `pending_size` word.
pub const SIZE_OFFSET: usize = 4;
/// Byte offset of the payload slot.
pub const PAYLOAD_OFFSET: usize = 8;
/// Size of the channel header.
pub const HEADER_SIZE: usize = PAYLOAD_OFFSET;

/// `pending_size` value meaning the slot is free.
pub const SLOT_FREE: i32 = 0;
/// `pending_size` value meaning the channel has been closed.
pub const SLOT_CLOSED: i32 = -1;

/// Storage length needed to carry payloads of up to `payload_capacity` bytes.
pub const fn storage_len(payload_capacity: usize) -> usize {
    HEADER_SIZE + payload_capacity
}
