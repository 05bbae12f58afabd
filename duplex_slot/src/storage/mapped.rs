//! Anonymous shared mapping, inherited by a child created with `fork`.

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use std::io;
use std::num::NonZeroUsize;

use super::SlotStorage;
use crate::HEADER_SIZE;
use crate::error::Result;
use crate::view::SharedView;

/// Channel storage in a `MAP_SHARED | MAP_ANONYMOUS` region.
///
/// Accesses are plain loads and stores; header words use acquire/release
/// atomics.
pub struct MappedStorage {
    view: SharedView,
}

impl MappedStorage {
    /// Maps `len` zeroed bytes. Must be called before forking the peer.
    pub fn create(len: usize) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "storage must be large enough for the channel header",
            )
            .into());
        }
        let size = NonZeroUsize::new(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"))?;

        // Anonymous mappings are zero-filled and page aligned.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )?
        };

        tracing::debug!(len, "created anonymous shared mapping");
        Ok(Self {
            view: unsafe { SharedView::new(ptr.cast(), len) },
        })
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }
}

impl SlotStorage for MappedStorage {
    fn len(&self) -> usize {
        self.view.len()
    }

    fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.view.read(offset, buf)
    }

    fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.view.write(offset, bytes)
    }

    fn load_word(&self, offset: usize) -> Result<i32> {
        self.view.load_word(offset)
    }

    fn store_word(&self, offset: usize, value: i32) -> Result<()> {
        self.view.store_word(offset, value)
    }
}

impl Drop for MappedStorage {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = munmap(
                std::ptr::NonNull::new_unchecked(self.view.as_ptr().cast()),
                self.view.len(),
            ) {
                tracing::warn!("munmap failed: {}", e);
            }
        }
    }
}
