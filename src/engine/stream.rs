// Consumer-facing stream, a seekable reader over a resource that is still downloading.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info};

use super::buffer::LocalBuffer;
use super::fetcher::Transfer;
use super::pending::Interval;
use super::stats::StatsSnapshot;
use crate::config::CacheConfig;
use crate::error::StreamError;
use crate::source::traits::RangeTransport;

enum StreamState {
    /// Bytes may still be pending; reads go through the transfer.
    Streaming(Arc<Transfer>),
    /// Everything is local. There is no way back to fetching.
    Complete {
        buffer: Box<dyn LocalBuffer>,
        position: u64,
    },
}

/// Read-only, seekable view of a remote resource that fills a local buffer
/// in the background.
///
/// `read` blocks while the bytes at the current position are still pending,
/// so it belongs on a blocking thread, never on an async runtime worker.
/// Once every byte is cached the stream drops the transfer and serves
/// straight from the buffer.
pub struct ProgressiveCacheStream {
    state: StreamState,
    length: u64,
    handle: TransferHandle,
}

impl ProgressiveCacheStream {
    /// Start fetching through `transport` into `buffer`, whose length is
    /// the resource length. Request tasks are spawned on `runtime`.
    pub fn new(
        transport: Arc<dyn RangeTransport>,
        buffer: Box<dyn LocalBuffer>,
        config: &CacheConfig,
        runtime: Handle,
    ) -> Self {
        let transfer = Transfer::start(transport, buffer, config, runtime);
        let length = transfer.length();
        info!("progressive cache stream started: {} bytes", length);

        Self {
            state: StreamState::Streaming(Arc::clone(&transfer)),
            length,
            handle: TransferHandle { transfer },
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        match &self.state {
            StreamState::Streaming(transfer) => transfer.position(),
            StreamState::Complete { position, .. } => *position,
        }
    }

    pub fn set_position(&mut self, position: u64) {
        self.promote_if_complete();
        match &mut self.state {
            StreamState::Streaming(transfer) => transfer.reposition(position),
            StreamState::Complete { position: current, .. } => *current = position,
        }
    }

    /// Whether the stream has switched to reading only from its local buffer.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, StreamState::Complete { .. })
    }

    pub fn handle(&self) -> TransferHandle {
        self.handle.clone()
    }

    fn promote_if_complete(&mut self) {
        let StreamState::Streaming(transfer) = &self.state else {
            return;
        };
        let Some(buffer) = transfer.take_completed_buffer() else {
            return;
        };
        let position = transfer.position();
        debug!("all bytes cached, stream now reads locally at {}", position);
        self.state = StreamState::Complete { buffer, position };
    }
}

impl Read for ProgressiveCacheStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.promote_if_complete();
        match &mut self.state {
            StreamState::Streaming(transfer) => Ok(transfer.read_into(buf)?),
            StreamState::Complete { buffer, position } => {
                let n = buffer.read_at(*position, buf)?;
                *position += n as u64;
                Ok(n)
            }
        }
    }
}

impl Seek for ProgressiveCacheStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position().checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        self.set_position(target);
        Ok(target)
    }
}

impl Drop for ProgressiveCacheStream {
    fn drop(&mut self) {
        if let StreamState::Streaming(transfer) = &self.state {
            debug!("ProgressiveCacheStream dropped, terminating transfer");
            transfer.terminate();
        }
    }
}

/// Cloneable handle to the transfer behind a [`ProgressiveCacheStream`].
///
/// Lets another thread inspect progress or terminate the transfer while the
/// stream itself is blocked in `read`.
#[derive(Clone)]
pub struct TransferHandle {
    transfer: Arc<Transfer>,
}

impl TransferHandle {
    /// Stop fetching and release blocked readers with end of data.
    /// Calling it again has no further effect.
    pub fn terminate(&self) {
        self.transfer.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.transfer.is_terminated()
    }

    /// Whether every byte of the resource is cached.
    pub fn is_complete(&self) -> bool {
        self.transfer.is_complete()
    }

    pub fn pending_ranges(&self) -> Vec<Interval> {
        self.transfer.pending_ranges()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.transfer.pending_bytes()
    }

    /// Range of the request currently in flight, if any.
    pub fn in_flight(&self) -> Option<Interval> {
        self.transfer.in_flight()
    }

    /// Terminal error of the transfer, if it failed.
    pub fn error(&self) -> Option<StreamError> {
        self.transfer.error()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.transfer.stats()
    }
}
