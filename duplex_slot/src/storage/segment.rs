//! System-V shared memory segment, attached and detached on every access.

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use super::SlotStorage;
use crate::HEADER_SIZE;
use crate::error::Result;
use crate::view::SharedView;

/// Channel storage in a `shmget(IPC_PRIVATE, ..)` segment.
///
/// The segment outlives both processes unless removed, so the creating
/// process removes it on drop if [`SegmentStorage::remove`] was not called.
/// A forked child holding a copy never does.
pub struct SegmentStorage {
    id: libc::c_int,
    len: usize,
    creator: libc::pid_t,
    removed: AtomicBool,
}

/// One `shmat` mapping, detached on drop.
struct Attachment {
    view: SharedView,
}

impl Attachment {
    fn new(id: libc::c_int, len: usize) -> Result<Self> {
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("shmat returned null"))?;
        // shmat returns a page-aligned address.
        Ok(Self {
            view: unsafe { SharedView::new(ptr, len) },
        })
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let ret = unsafe { libc::shmdt(self.view.as_ptr() as *const libc::c_void) };
        if ret != 0 {
            tracing::warn!("shmdt failed: {}", io::Error::last_os_error());
        }
    }
}

impl SegmentStorage {
    /// Creates a private segment of `len` zeroed bytes, readable and
    /// writable by the owner only.
    pub fn create(len: usize) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "storage must be large enough for the channel header",
            )
            .into());
        }
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                len,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
            )
        };
        if id < 0 {
            return Err(io::Error::last_os_error().into());
        }

        tracing::debug!(id, len, "created shared memory segment");
        Ok(Self {
            id,
            len,
            creator: std::process::id() as libc::pid_t,
            removed: AtomicBool::new(false),
        })
    }

    /// Segment identifier as returned by `shmget`.
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Marks the segment for removal (`IPC_RMID`). Calls after a successful
    /// removal do nothing; a failed removal is retried on drop.
    ///
    /// Linux keeps a removed segment alive while it is attached, but new
    /// attachments are not guaranteed, so call this only once both
    /// endpoints are done.
    pub fn remove(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Ok(());
        }
        let ret = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        self.removed.store(true, Ordering::Release);
        tracing::debug!(id = self.id, "removed shared memory segment");
        Ok(())
    }

    fn attach(&self) -> Result<Attachment> {
        Attachment::new(self.id, self.len)
    }
}

impl SlotStorage for SegmentStorage {
    fn len(&self) -> usize {
        self.len
    }

    fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.attach()?.view.read(offset, buf)
    }

    fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.attach()?.view.write(offset, bytes)
    }

    fn load_word(&self, offset: usize) -> Result<i32> {
        self.attach()?.view.load_word(offset)
    }

    fn store_word(&self, offset: usize, value: i32) -> Result<()> {
        self.attach()?.view.store_word(offset, value)
    }
}

impl Drop for SegmentStorage {
    fn drop(&mut self) {
        let creator = std::process::id() as libc::pid_t == self.creator;
        if !creator || self.removed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.remove() {
            tracing::warn!(id = self.id, "failed to remove shared memory segment: {}", e);
        }
    }
}
