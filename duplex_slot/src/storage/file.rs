use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use super::SlotStorage;
use crate::HEADER_SIZE;
use crate::error::{Error, Result};

/// Channel storage in a regular file.
///
/// Every access is a positional `pread`/`pwrite`, so each operation goes
/// through the OS page cache; there is no user-space buffer to flush.
pub struct FileStorage {
    file: File,
    len: usize,
    path: PathBuf,
}

impl FileStorage {
    /// Creates (or truncates) the file at `path`, sizes it to `len` bytes
    /// and zeroes the header.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "storage must be large enough for the channel header",
            )
            .into());
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len as u64)?;
        file.write_all_at(&[0u8; HEADER_SIZE], 0)?;

        tracing::debug!(path = %path.display(), len, "created file storage");
        Ok(Self { file, len, path })
    }

    /// Opens an existing channel file; its current length is the storage size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large"))?;
        Ok(Self { file, len, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the backing file. Open handles keep working until dropped.
    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
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
}

impl SlotStorage for FileStorage {
    fn len(&self) -> usize {
        self.len
    }

    fn read_region_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        self.file.read_exact_at(buf, offset as u64)?;
        Ok(())
    }

    fn write_region(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        self.file.write_all_at(bytes, offset as u64)?;
        Ok(())
    }
}
