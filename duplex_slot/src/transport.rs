//! Two-party single-slot handshake over any [`SlotStorage`].
//!
//! Write: wait for `pending_size == 0`, copy the payload, publish `owner`,
//! then publish `pending_size` (release). Read: wait for
//! `pending_size != 0 && owner != self`, copy the payload, free the slot,
//! then claim `owner`. Close: publish `owner`, then `pending_size = -1`.
//!
//! A writer stores `owner` before `pending_size`, so a peer that observes a
//! size also observes the owner that goes with it. A reader never shows its
//! own id next to a non-zero size.

use std::fmt;

use crate::error::{Error, Result};
use crate::poll::{PollPolicy, Poller};
use crate::storage::SlotStorage;
use crate::{OWNER_OFFSET, PAYLOAD_OFFSET, SIZE_OFFSET, SLOT_CLOSED, SLOT_FREE};

/// Endpoint id written into the `owner` word.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Zero = 0,
    One = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Zero, Side::One];

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn peer(self) -> Side {
        match self {
            Side::Zero => Side::One,
            Side::One => Side::Zero,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i32> for Side {
    type Error = Error;

    fn try_from(id: i32) -> Result<Self> {
        match id {
            0 => Ok(Side::Zero),
            1 => Ok(Side::One),
            other => Err(Error::InvalidEndpointId(other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Open,
    /// Terminal. Reads return empty and writes do nothing.
    Closed,
}

/// Outcome of waiting on the header.
enum Slot {
    Ready(usize),
    Closed,
}

/// One side of the channel.
pub struct Endpoint<S: SlotStorage> {
    storage: S,
    side: Side,
    state: EndpointState,
    policy: PollPolicy,
    capacity: usize,
}

impl<S: SlotStorage> Endpoint<S> {
    /// Binds `side` to an existing storage without touching the header.
    ///
    /// Nothing stops a second endpoint with the same side from being bound
    /// this way; [`Channel`] hands out each side once.
    pub fn bind(storage: S, side: Side) -> Self {
        let capacity = storage.payload_capacity().min(i32::MAX as usize);
        tracing::debug!(side = side.id(), capacity, "endpoint bound");
        Self {
            storage,
            side,
            state: EndpointState::Open,
            policy: PollPolicy::default(),
            capacity,
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: PollPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == EndpointState::Closed
    }

    /// Largest message this endpoint can write.
    pub fn payload_capacity(&self) -> usize {
        self.capacity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn mark_closed(&mut self) {
        if self.state == EndpointState::Open {
            tracing::debug!(side = self.side.id(), "peer closed the channel");
        }
        self.state = EndpointState::Closed;
    }

    /// Sends `bytes` once the slot is free.
    ///
    /// Does nothing on a closed endpoint, and returns without writing if the
    /// peer closes while this endpoint is waiting.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if bytes.len() > self.capacity {
            return Err(Error::PayloadTooLarge {
                len: bytes.len(),
                capacity: self.capacity,
            });
        }

        let storage = &self.storage;
        let free = Poller::new(self.policy).poll_until(|| {
            match storage.load_word(SIZE_OFFSET)? {
                SLOT_FREE => Ok(Some(true)),
                SLOT_CLOSED => Ok(Some(false)),
                size if size > 0 => Ok(None),
                size => Err(Error::CorruptHeader { pending_size: size }),
            }
        })?;
        if !free {
            self.mark_closed();
            return Ok(());
        }

        self.storage.write_region(PAYLOAD_OFFSET, bytes)?;
        self.storage.store_word(OWNER_OFFSET, self.side.id())?;
        self.storage.store_word(SIZE_OFFSET, bytes.len() as i32)?;
        tracing::trace!(side = self.side.id(), len = bytes.len(), "message written");
        Ok(())
    }

    /// Waits for a message from the peer and returns it.
    ///
    /// An empty result means the channel is closed.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Like [`Endpoint::read_bytes`], reusing `buf`. Returns the message
    /// length; `0` means the channel is closed and `buf` is left empty.
    pub fn read_into(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        buf.clear();
        if self.is_closed() {
            return Ok(0);
        }

        let len = match self.wait_for_message()? {
            Slot::Ready(len) => len,
            Slot::Closed => {
                self.mark_closed();
                return Ok(0);
            }
        };

        buf.resize(len, 0);
        self.storage.read_region_into(PAYLOAD_OFFSET, buf)?;
        // Free the slot before claiming it: `size > 0` with our id as owner
        // would hand the writer its own message back.
        self.storage.store_word(SIZE_OFFSET, SLOT_FREE)?;
        self.storage.store_word(OWNER_OFFSET, self.side.id())?;
        tracing::trace!(side = self.side.id(), len, "message consumed");
        Ok(len)
    }

    fn wait_for_message(&self) -> Result<Slot> {
        let storage = &self.storage;
        let me = self.side.id();
        let capacity = self.capacity;
        Poller::new(self.policy).poll_until(|| {
            let size = storage.load_word(SIZE_OFFSET)?;
            if size == SLOT_FREE {
                return Ok(None);
            }
            if size == SLOT_CLOSED {
                return Ok(Some(Slot::Closed));
            }
            if size < 0 || size as usize > capacity {
                return Err(Error::CorruptHeader { pending_size: size });
            }
            if storage.load_word(OWNER_OFFSET)? == me {
                return Ok(None);
            }
            Ok(Some(Slot::Ready(size as usize)))
        })
    }

    /// Closes locally and signals the peer. Does not wait for the peer.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state = EndpointState::Closed;
        self.storage.store_word(OWNER_OFFSET, self.side.id())?;
        self.storage.store_word(SIZE_OFFSET, SLOT_CLOSED)?;
        tracing::debug!(side = self.side.id(), "endpoint closed");
        Ok(())
    }
}

impl<S: SlotStorage> fmt::Debug for Endpoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Hands out the two endpoints of one storage, each side at most once.
pub struct Channel<S: SlotStorage + Clone> {
    storage: S,
    bound: [bool; 2],
    policy: PollPolicy,
}

impl<S: SlotStorage + Clone> Channel<S> {
    /// Resets the header to an empty, open slot.
    pub fn create(storage: S) -> Result<Self> {
        storage.store_word(OWNER_OFFSET, Side::Zero.id())?;
        storage.store_word(SIZE_OFFSET, SLOT_FREE)?;
        Ok(Self::attach(storage))
    }

    /// Uses the header as it currently is.
    pub fn attach(storage: S) -> Self {
        Self {
            storage,
            bound: [false; 2],
            policy: PollPolicy::default(),
        }
    }

    /// Policy given to endpoints created after this call.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Binds `side`. Fails with [`Error::EndpointTaken`] the second time.
    pub fn endpoint(&mut self, side: Side) -> Result<Endpoint<S>> {
        if self.bound[side.index()] {
            return Err(Error::EndpointTaken(side));
        }
        self.bound[side.index()] = true;
        Ok(Endpoint::bind(self.storage.clone(), side).with_policy(self.policy))
    }

    /// Endpoint for a raw id; rejects anything but 0 and 1.
    pub fn endpoint_by_id(&mut self, id: i32) -> Result<Endpoint<S>> {
        self.endpoint(Side::try_from(id)?)
    }

    /// Both endpoints, side 0 first.
    pub fn pair(mut self) -> Result<(Endpoint<S>, Endpoint<S>)> {
        Ok((self.endpoint(Side::Zero)?, self.endpoint(Side::One)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HEADER_SIZE;
    use crate::poll::Backoff;
    use crate::storage::MappedStorage;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn channel(payload: usize) -> Channel<Arc<MappedStorage>> {
        let storage = Arc::new(MappedStorage::create(HEADER_SIZE + payload).unwrap());
        Channel::create(storage).unwrap()
    }

    fn short_wait() -> PollPolicy {
        PollPolicy::new(Backoff::yielding()).with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_ping_pong_then_close() {
        let (mut a, mut b) = channel(64).pair().unwrap();

        a.write_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(b.read_bytes().unwrap(), vec![1, 2, 3]);

        b.write_bytes(&[9, 9]).unwrap();
        assert_eq!(a.read_bytes().unwrap(), vec![9, 9]);

        a.close().unwrap();
        assert!(a.is_closed());
        assert_eq!(b.read_bytes().unwrap(), Vec::<u8>::new());
        assert_eq!(b.state(), EndpointState::Closed);
    }

    #[test]
    fn test_no_self_read() {
        let mut ch = channel(16).with_policy(short_wait());
        let mut a = ch.endpoint(Side::Zero).unwrap();
        a.write_bytes(b"mine").unwrap();
        assert!(matches!(a.read_bytes(), Err(Error::PeerUnresponsive { .. })));
        assert!(!a.is_closed());

        let mut b = ch.endpoint(Side::One).unwrap();
        assert_eq!(b.read_bytes().unwrap(), b"mine");
    }

    /// Mapped storage that snapshots `(owner, pending_size)` after every
    /// header store.
    #[derive(Clone)]
    struct HeaderLog {
        inner: Arc<MappedStorage>,
        seen: Arc<Mutex<Vec<(i32, i32)>>>,
    }

    impl SlotStorage for HeaderLog {
        fn len(&self) -> usize {
            self.inner.len()
        }

        fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
            self.inner.read_region_into(offset, buf)
        }

        fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()> {
            self.inner.write_region(offset, bytes)
        }

        fn load_word(&self, offset: usize) -> Result<i32> {
            self.inner.load_word(offset)
        }

        fn store_word(&self, offset: usize, value: i32) -> Result<()> {
            self.inner.store_word(offset, value)?;
            let owner = self.inner.load_word(OWNER_OFFSET)?;
            let size = self.inner.load_word(SIZE_OFFSET)?;
            self.seen.lock().unwrap().push((owner, size));
            Ok(())
        }
    }

    #[test]
    fn test_consume_never_shows_writer_its_own_message() {
        let storage = HeaderLog {
            inner: Arc::new(MappedStorage::create(HEADER_SIZE + 16).unwrap()),
            seen: Arc::default(),
        };
        let seen = Arc::clone(&storage.seen);
        let mut ch = Channel::create(storage).unwrap().with_policy(short_wait());
        let mut a = ch.endpoint(Side::Zero).unwrap();
        let mut b = ch.endpoint(Side::One).unwrap();

        a.write_bytes(b"ping-from-a").unwrap();
        seen.lock().unwrap().clear();
        assert_eq!(b.read_bytes().unwrap(), b"ping-from-a");

        // Every header state `a` could have polled while `b` consumed.
        let states = seen.lock().unwrap().clone();
        assert_eq!(states, vec![(0, SLOT_FREE), (1, SLOT_FREE)]);
        assert!(!states.iter().any(|&(owner, size)| owner == 1 && size > 0));

        // Replay the first store of the consume: `a` must keep waiting.
        a.write_bytes(b"again").unwrap();
        a.storage().store_word(SIZE_OFFSET, SLOT_FREE).unwrap();
        assert!(matches!(a.read_bytes(), Err(Error::PeerUnresponsive { .. })));
    }

    #[test]
    fn test_second_write_waits_for_consumer() {
        let mut ch = channel(16).with_policy(short_wait());
        let mut a = ch.endpoint(Side::Zero).unwrap();
        let mut b = ch.endpoint(Side::One).unwrap();

        a.write_bytes(b"first").unwrap();
        assert!(matches!(
            a.write_bytes(b"second"),
            Err(Error::PeerUnresponsive { .. })
        ));
        // The slot still holds the first message, untouched.
        assert_eq!(b.read_bytes().unwrap(), b"first");
        a.write_bytes(b"second").unwrap();
        assert_eq!(b.read_bytes().unwrap(), b"second");
    }

    #[test]
    fn test_closed_endpoint_is_noop() {
        let (mut a, mut b) = channel(16).pair().unwrap();
        a.close().unwrap();

        // Write observes the sentinel and closes without writing.
        b.write_bytes(b"late").unwrap();
        assert!(b.is_closed());
        assert_eq!(b.storage().load_word(SIZE_OFFSET).unwrap(), SLOT_CLOSED);

        // Further calls never block.
        assert!(b.read_bytes().unwrap().is_empty());
        b.write_bytes(b"later").unwrap();
        a.write_bytes(b"self").unwrap();
        assert!(a.read_bytes().unwrap().is_empty());
        a.close().unwrap();
    }

    #[test]
    fn test_payload_limits() {
        let (mut a, _b) = channel(4).pair().unwrap();
        assert_eq!(a.payload_capacity(), 4);
        assert!(matches!(a.write_bytes(&[]), Err(Error::EmptyPayload)));
        assert!(matches!(
            a.write_bytes(&[0; 5]),
            Err(Error::PayloadTooLarge { len: 5, capacity: 4 })
        ));
        a.write_bytes(&[0; 4]).unwrap();
    }

    #[test]
    fn test_endpoint_taken() {
        let mut ch = channel(8);
        let _a = ch.endpoint(Side::Zero).unwrap();
        let _b = ch.endpoint_by_id(1).unwrap();
        assert!(matches!(
            ch.endpoint(Side::Zero),
            Err(Error::EndpointTaken(Side::Zero))
        ));
        assert!(matches!(ch.endpoint_by_id(2), Err(Error::InvalidEndpointId(2))));
    }

    #[test]
    fn test_corrupt_header() {
        let (mut a, mut b) = channel(8).pair().unwrap();
        a.storage().store_word(SIZE_OFFSET, 9).unwrap();
        a.storage().store_word(OWNER_OFFSET, 0).unwrap();
        assert!(matches!(
            b.read_bytes(),
            Err(Error::CorruptHeader { pending_size: 9 })
        ));
        a.storage().store_word(SIZE_OFFSET, -7).unwrap();
        assert!(matches!(
            a.write_bytes(b"x"),
            Err(Error::CorruptHeader { pending_size: -7 })
        ));
    }

    #[test]
    fn test_read_into_reuses_buffer() {
        let (mut a, mut b) = channel(32).pair().unwrap();
        let mut buf = Vec::with_capacity(32);
        a.write_bytes(&[5; 20]).unwrap();
        assert_eq!(b.read_into(&mut buf).unwrap(), 20);
        b.write_bytes(&buf).unwrap();
        a.read_into(&mut buf).unwrap();
        a.write_bytes(&[6; 3]).unwrap();
        assert_eq!(b.read_into(&mut buf).unwrap(), 3);
        assert_eq!(buf, vec![6; 3]);
    }

    #[test]
    fn test_side() {
        assert_eq!(Side::Zero.peer(), Side::One);
        assert_eq!(Side::try_from(1).unwrap(), Side::One);
        assert_eq!(Side::One.to_string(), "1");
    }
}
