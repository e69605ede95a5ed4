//! A file memory-mapped as an array of 32-bit little-endian words.
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// The error type for opening, resizing and flushing mapped word files.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open {path} for mapping")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resize {path} to {bytes} bytes")]
    Resize {
        path: PathBuf,
        bytes: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to map {path}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to flush {path}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fixed-size file exposed as an array of `u32` words, 32-bit little-endian on disk.
///
/// Reads outside the mapped range return a sentinel `0` instead of panicking,
/// and writes outside the range are dropped. End-of-range probes in the index
/// layer rely on the read side of this contract.
pub struct MmapFile {
    // `None` iff the file is empty; mapping a zero-length file is an error on Linux
    map: Option<MmapMut>,
    words: usize,
    path: PathBuf,
    file: File,
}

impl std::fmt::Debug for MmapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.path.display(), bytesize::ByteSize((self.words * 4) as u64))
    }
}

impl MmapFile {
    /// Open or create the file, truncate it to `bytes` and map it read-write.
    pub fn create(path: impl AsRef<Path>, bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| Error::Open { path: path.clone(), source })?;
        file.set_len(bytes as u64).map_err(|source| Error::Resize {
            path: path.clone(),
            bytes: bytes as u64,
            source,
        })?;
        let map = Self::map(&file, bytes, &path)?;
        Ok(MmapFile { map, words: bytes / 4, path, file })
    }

    /// Open an existing file of a known size, e.g. one whose length is recorded in `DB_INFO`.
    pub fn open(path: impl AsRef<Path>, bytes: usize) -> Result<Self> {
        Self::create(path, bytes)
    }

    fn map(file: &File, bytes: usize, path: &Path) -> Result<Option<MmapMut>> {
        if bytes == 0 {
            return Ok(None);
        }
        // SAFETY: the file stays open for the lifetime of the mapping and is only
        // truncated through `resize`, which remaps first.
        let map = unsafe { MmapMut::map_mut(file) }
            .map_err(|source| Error::Map { path: path.to_path_buf(), source })?;
        Ok(Some(map))
    }

    /// Number of addressable words.
    pub const fn words(&self) -> usize {
        self.words
    }

    /// Read the word at `index`, or the sentinel `0` when out of bounds.
    pub fn get(&self, index: usize) -> u32 {
        match &self.map {
            Some(map) if index < self.words => {
                let at = index * 4;
                u32::from_le_bytes([map[at], map[at + 1], map[at + 2], map[at + 3]])
            }
            _ => 0,
        }
    }

    /// Write the word at `index`; out-of-bounds writes are dropped.
    pub fn set(&mut self, index: usize, value: u32) {
        if index >= self.words {
            return;
        }
        if let Some(map) = &mut self.map {
            map[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Truncate or extend the backing file and remap.
    pub fn resize(&mut self, bytes: usize) -> Result<()> {
        self.map = None;
        self.file.set_len(bytes as u64).map_err(|source| Error::Resize {
            path: self.path.clone(),
            bytes: bytes as u64,
            source,
        })?;
        self.map = Self::map(&self.file, bytes, &self.path)?;
        self.words = bytes / 4;
        Ok(())
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        if let Some(map) = &self.map {
            map.flush().map_err(|source| Error::Flush { path: self.path.clone(), source })?;
        }
        Ok(())
    }

    /// Hand out a writer that may be shared across the build worker threads.
    /// Borrows the map mutably so no other access can overlap with it.
    pub fn region_writer(&mut self) -> RegionWriter<'_> {
        let (ptr, words) = match &mut self.map {
            Some(map) => (map.as_mut_ptr(), self.words),
            None => (std::ptr::null_mut(), 0),
        };
        RegionWriter { ptr, words, _map: PhantomData }
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("{e}");
        }
    }
}

/// Unsynchronised write access into a [`MmapFile`] for the index builder.
///
/// Workers reserve disjoint word intervals under the build mutex and then
/// write into their own interval without further locking.
pub struct RegionWriter<'a> {
    ptr: *mut u8,
    words: usize,
    _map: PhantomData<&'a mut MmapFile>,
}

// SAFETY: every interval is reserved exactly once under the build mutex before
// any thread writes to it, so no two threads ever touch the same word.
unsafe impl Send for RegionWriter<'_> {}
unsafe impl Sync for RegionWriter<'_> {}

impl RegionWriter<'_> {
    /// Write the word at `index`; out-of-bounds writes are dropped.
    pub fn set(&self, index: usize, value: u32) {
        if index < self.words {
            let bytes = value.to_le_bytes();
            // SAFETY: `index` is in bounds and inside an interval owned by the caller.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(index * 4), 4);
            }
        }
    }
}
