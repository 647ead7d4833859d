//! The page-store seam. The core only ever talks to [`PageStore`];
//! concrete devices live behind it and are interchangeable. Two ship with
//! the crate: [`MemStore`] (a RAM-backed array, handy for tests) and
//! [`FileStore`] (a 16 MiB image file).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::config::{NUM_PAGES, PAGE_SIZE};
use crate::error::{FsError, Result};

/// A fixed array of 65536 pages of 256 bytes, addressed by id.
///
/// Reads and writes move whole pages; no sub-page I/O. An unloaded store
/// reports [`FsError::DeviceUnavailable`] from every access, which the
/// record layer treats as fatal.
pub trait PageStore: Send + Sync {
    /// Whether the store is mounted and usable.
    fn is_loaded(&self) -> bool;

    /// Reads page `id` into `buf`.
    fn read_page(&self, id: u16, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Replaces the full 256-byte content of page `id`.
    fn write_page(&self, id: u16, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Pushes any buffered writes down to the backing medium.
    fn flush(&self) -> Result<()>;

    /// Finalizes and releases the store. Accesses after this fail.
    fn unload(&self);
}

/// In-memory page store. Contents vanish when dropped.
pub struct MemStore {
    pages: Mutex<Option<Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore {
            pages: Mutex::new(Some(vec![0u8; NUM_PAGES * PAGE_SIZE])),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemStore {
    fn is_loaded(&self) -> bool {
        self.pages.lock().unwrap().is_some()
    }

    fn read_page(&self, id: u16, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let guard = self.pages.lock().unwrap();
        let pages = guard.as_ref().ok_or(FsError::DeviceUnavailable)?;
        let start = id as usize * PAGE_SIZE;
        buf.copy_from_slice(&pages[start..start + PAGE_SIZE]);
        Ok(())
    }

    fn write_page(&self, id: u16, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut guard = self.pages.lock().unwrap();
        let pages = guard.as_mut().ok_or(FsError::DeviceUnavailable)?;
        let start = id as usize * PAGE_SIZE;
        pages[start..start + PAGE_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn unload(&self) {
        self.pages.lock().unwrap().take();
    }
}

/// File-backed page store over a fixed-size 16 MiB image.
pub struct FileStore {
    inner: Mutex<Option<File>>,
}

impl FileStore {
    /// Opens an existing image, or creates one sized to the full address
    /// space if the path does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len((NUM_PAGES * PAGE_SIZE) as u64)?;
        Ok(FileStore {
            inner: Mutex::new(Some(file)),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().unwrap();
        let file = guard.as_mut().ok_or(FsError::DeviceUnavailable)?;
        f(file).map_err(|_| FsError::DeviceUnavailable)
    }
}

impl PageStore for FileStore {
    fn is_loaded(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    fn read_page(&self, id: u16, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(id as u64 * PAGE_SIZE as u64))?;
            file.read_exact(buf)
        })
    }

    fn write_page(&self, id: u16, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(id as u64 * PAGE_SIZE as u64))?;
            file.write_all(buf)
        })
    }

    fn flush(&self) -> Result<()> {
        self.with_file(|file| file.sync_data())
    }

    fn unload(&self) {
        // Dropping the handle closes and flushes the image.
        self.inner.lock().unwrap().take();
    }
}
