//! Bounds-checked view over a shared byte buffer.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{Error, Result};

/// Raw window onto memory that another process may be reading or writing.
///
/// The view does not own the memory; the backend that created it keeps the
/// mapping (or attachment) alive for as long as the view is used.
#[derive(Debug, Clone, Copy)]
pub struct SharedView {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for SharedView {}
unsafe impl Sync for SharedView {}

impl SharedView {
    /// Creates a view over `len` bytes starting at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes, and 4-byte
    /// aligned, for as long as the view is used.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check(&self, offset: usize, size: usize) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                size,
                len: self.len,
            }),
        }
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the view.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copies `bytes` into the view starting at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Returns the header word at `offset` as an atomic.
    pub fn word(&self, offset: usize) -> Result<&AtomicI32> {
        self.check(offset, std::mem::size_of::<AtomicI32>())?;
        if offset % std::mem::align_of::<AtomicI32>() != 0 {
            return Err(Error::Misaligned { offset });
        }
        Ok(unsafe { &*(self.ptr.as_ptr().add(offset) as *const AtomicI32) })
    }

    /// Acquire load; pairs with [`SharedView::store_word`] in the peer.
    pub fn load_word(&self, offset: usize) -> Result<i32> {
        Ok(self.word(offset)?.load(Ordering::Acquire))
    }

    /// Release store: every earlier write through this view (the payload)
    /// is visible to a peer that acquires this word.
    pub fn store_word(&self, offset: usize, value: i32) -> Result<()> {
        self.word(offset)?.store(value, Ordering::Release);
        Ok(())
    }
}
