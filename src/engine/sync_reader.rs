// Independently positioned readers over one shared source.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

/// Reader with its own cursor over a source shared under one lock.
///
/// Every call locks the source, moves it to this reader's position and
/// performs the operation there, so interleaved readers never observe each
/// other's positioning. All access to the source is serialized.
pub struct SynchronizedReader<S> {
    source: Arc<Mutex<S>>,
    position: u64,
}

impl<S: Read + Seek> SynchronizedReader<S> {
    pub fn new(source: S) -> Self {
        Self::from_shared(Arc::new(Mutex::new(source)))
    }

    pub fn from_shared(source: Arc<Mutex<S>>) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    /// Another reader over the same source, starting at offset 0.
    pub fn handle(&self) -> Self {
        Self::from_shared(Arc::clone(&self.source))
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn shared(&self) -> &Arc<Mutex<S>> {
        &self.source
    }
}

impl<S> Clone for SynchronizedReader<S> {
    /// Clones keep the current position.
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            position: self.position,
        }
    }
}

impl<S: Read + Seek> Read for SynchronizedReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut source = self.source.lock();
        source.seek(SeekFrom::Start(self.position))?;
        let n = source.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: Read + Seek> Seek for SynchronizedReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut source = self.source.lock();
        let target = match pos {
            // Only the source knows its end; one seek there is enough.
            SeekFrom::End(delta) => source.seek(SeekFrom::End(delta))?,
            SeekFrom::Start(offset) => source.seek(SeekFrom::Start(offset))?,
            SeekFrom::Current(delta) => {
                let target = self.position.checked_add_signed(delta).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "invalid seek to a negative or overflowing position",
                    )
                })?;
                source.seek(SeekFrom::Start(target))?
            }
        };
        self.position = target;
        Ok(target)
    }
}
