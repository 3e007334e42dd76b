// Local buffer: fixed-length, randomly addressable store the transfer writes into.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use memmap2::MmapMut;

/// Fixed-length byte store supporting positioned reads and writes.
///
/// Implementations are sized eagerly at construction; the length never changes.
pub trait LocalBuffer: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all of `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

fn check_span(len: u64, offset: u64, count: usize) -> io::Result<()> {
    match offset.checked_add(count as u64) {
        Some(end) if end <= len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("span {}+{} outside buffer of {} bytes", offset, count, len),
        )),
    }
}

fn readable(len: u64, offset: u64, want: usize) -> usize {
    if offset >= len {
        0
    } else {
        want.min((len - offset) as usize)
    }
}

/// Buffer backed by a preallocated, memory-mapped file.
pub struct MmapBuffer {
    mmap: MmapMut,
    len: u64,
    path: PathBuf,
}

impl MmapBuffer {
    /// Create `<dir>/<name>.cache`, size it to `len` bytes and map it.
    ///
    /// The file is removed again when the buffer is dropped.
    pub fn new(dir: &Path, name: &str, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(anyhow!("buffer length must be > 0"));
        }

        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.cache", name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.set_len(len)?;

        // SAFETY: we just created the file and own it exclusively.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self { mmap, len, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalBuffer for MmapBuffer {
    fn len(&self) -> u64 {
        self.len
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_span(self.len, offset, data.len())?;
        let offset = offset as usize;
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = readable(self.len, offset, buf.len());
        let offset = offset as usize;
        buf[..n].copy_from_slice(&self.mmap[offset..offset + n]);
        Ok(n)
    }
}

impl Drop for MmapBuffer {
    fn drop(&mut self) {
        // Best-effort deletion of the backing file.
        let _ = fs::remove_file(&self.path);
    }
}

/// Heap-allocated buffer, zero-filled up front.
pub struct MemoryBuffer {
    data: Vec<u8>,
}

impl MemoryBuffer {
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; len] }
    }
}

impl LocalBuffer for MemoryBuffer {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_span(self.len(), offset, data.len())?;
        let offset = offset as usize;
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = readable(self.len(), offset, buf.len());
        let offset = offset as usize;
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }
}
