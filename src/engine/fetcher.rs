// Single-flight range fetcher. Drives ranged requests into the local buffer
// and serves positioned reads against the shared pending-range set.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::LocalBuffer;
use super::pending::{Interval, PendingRanges};
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::StreamError;
use crate::source::content_range::served_interval;
use crate::source::traits::RangeTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    /// The reader moved somewhere the request is not fetching.
    Reposition,
    Terminate,
}

struct InFlight {
    id: u64,
    range: Interval,
    cancel: CancellationToken,
    abort: Option<AbortReason>,
}

struct TransferState {
    pending: PendingRanges,
    /// `None` once the completed buffer has been handed to the stream.
    buffer: Option<Box<dyn LocalBuffer>>,
    /// Where the next read starts; fetching targets the first pending range from here.
    position: u64,
    in_flight: Option<InFlight>,
    next_request_id: u64,
    error: Option<StreamError>,
    terminated: bool,
}

impl TransferState {
    fn is_current(&self, id: u64) -> bool {
        matches!(&self.in_flight, Some(f) if f.id == id)
    }

    /// Cancel the in-flight request. It stays recorded until its own task
    /// reports back, so a replacement is never issued alongside it.
    fn abort_in_flight(&mut self, reason: AbortReason) {
        if let Some(f) = self.in_flight.as_mut() {
            if f.abort.is_none() {
                debug!(
                    "aborting range request {} bytes={}-{} reason={:?}",
                    f.id, f.range.start, f.range.end, reason
                );
                f.abort = Some(reason);
            }
            f.cancel.cancel();
        }
    }
}

/// Whether a request for `range` reaches `interval` before any other pending
/// bytes. A live request only ever has the tail of its own range left.
fn heads_for(range: Interval, interval: Interval) -> bool {
    interval.end == range.end && interval.start >= range.start
}

enum Outcome {
    Finished,
    Cancelled,
    Failed(StreamError),
}

pub(crate) struct Transfer {
    state: Mutex<TransferState>,
    data_ready: Condvar,
    transport: Arc<dyn RangeTransport>,
    runtime: Handle,
    length: u64,
    request_timeout: Duration,
    read_timeout: Duration,
    seek_threshold: u64,
    fill_behind: bool,
    stats: StatsCollector,
}

impl Transfer {
    /// Take ownership of `buffer` and issue the first request from offset 0.
    pub(crate) fn start(
        transport: Arc<dyn RangeTransport>,
        buffer: Box<dyn LocalBuffer>,
        config: &CacheConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        let length = buffer.len();
        let transfer = Arc::new(Self {
            state: Mutex::new(TransferState {
                pending: PendingRanges::new(length),
                buffer: Some(buffer),
                position: 0,
                in_flight: None,
                next_request_id: 1,
                error: None,
                terminated: false,
            }),
            data_ready: Condvar::new(),
            transport,
            runtime,
            length,
            request_timeout: config.request_timeout(),
            read_timeout: config.read_timeout(),
            seek_threshold: config.seek_threshold_bytes,
            fill_behind: config.fill_behind,
            stats: StatsCollector::new(),
        });

        {
            let mut state = transfer.state.lock();
            transfer.request_next(&mut state);
        }
        transfer
    }

    pub(crate) fn length(&self) -> u64 {
        self.length
    }

    pub(crate) fn position(&self) -> u64 {
        self.state.lock().position
    }

    /// Read at the current position, waiting while the bytes there are
    /// pending and a request is in flight.
    ///
    /// Returns 0 at end of data or once the transfer is terminated. A stored
    /// transfer error is returned before anything else, even for a position
    /// at or past the end or on bytes that are already cached.
    pub(crate) fn read_into(self: &Arc<Self>, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut guard = self.state.lock();
        loop {
            let state = &mut *guard;
            if let Some(err) = &state.error {
                return Err(err.clone());
            }

            let position = state.position;
            if buf.is_empty() || position >= self.length {
                return Ok(0);
            }

            let mut available = (buf.len() as u64).min(self.length - position);
            if let Some(next) = state
                .pending
                .find_at_or_after(position, false)
                .and_then(|i| state.pending.get(i))
            {
                available = available.min(next.start.saturating_sub(position));
            }

            if available == 0 {
                if state.terminated {
                    return Ok(0);
                }
                // The loop may have gone idle after catching up behind us.
                self.request_next(state);
                if state.in_flight.is_none() {
                    return Ok(0);
                }
                self.data_ready.wait(&mut guard);
                continue;
            }

            let Some(buffer) = state.buffer.as_ref() else {
                return Ok(0);
            };
            let n = buffer
                .read_at(position, &mut buf[..available as usize])
                .map_err(StreamError::buffer)?;
            state.position += n as u64;
            self.stats.record_served(n as u64);
            return Ok(n);
        }
    }

    /// Move the read position, re-targeting the fetch loop when the
    /// in-flight request no longer serves the new position first.
    pub(crate) fn reposition(self: &Arc<Self>, position: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if position != state.position {
            let covering = state.pending.covering(position);
            let fetching = state
                .in_flight
                .as_ref()
                .filter(|f| f.abort.is_none())
                .map(|f| f.range);

            match (covering, fetching) {
                (Some(target), Some(range)) if heads_for(range, target) => {
                    // Inside the interval being fetched: keep it unless the
                    // reader would wait too long for the bytes in between.
                    if position - target.start > self.seek_threshold {
                        state.pending.split(position);
                        state.abort_in_flight(AbortReason::Reposition);
                    }
                }
                (Some(_), Some(_)) => {
                    state.pending.split(position);
                    state.abort_in_flight(AbortReason::Reposition);
                }
                (Some(_), None) => {
                    state.pending.split(position);
                }
                (None, Some(range)) => {
                    // On cached bytes: the fetch must be heading for the next
                    // gap the reader will hit.
                    if let Some(next) = self.next_target(&state.pending, position) {
                        if !heads_for(range, next) {
                            state.abort_in_flight(AbortReason::Reposition);
                        }
                    }
                }
                (None, None) => {}
            }

            debug!("reposition {} -> {}", state.position, position);
            state.position = position;
        }

        self.data_ready.notify_all();
        self.request_next(state);
    }

    /// Stop fetching. Blocked readers wake up and see end of data.
    pub(crate) fn terminate(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        state.abort_in_flight(AbortReason::Terminate);
        debug!("transfer terminated");
        self.data_ready.notify_all();
    }

    /// Hand out the buffer once nothing is pending. Fetching ends for good.
    pub(crate) fn take_completed_buffer(&self) -> Option<Box<dyn LocalBuffer>> {
        let mut state = self.state.lock();
        if !state.pending.is_empty() {
            return None;
        }
        state.terminated = true;
        state.abort_in_flight(AbortReason::Terminate);
        self.data_ready.notify_all();
        state.buffer.take()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub(crate) fn pending_ranges(&self) -> Vec<Interval> {
        self.state.lock().pending.as_slice().to_vec()
    }

    pub(crate) fn pending_bytes(&self) -> u64 {
        self.state.lock().pending.pending_bytes()
    }

    pub(crate) fn in_flight(&self) -> Option<Interval> {
        self.state.lock().in_flight.as_ref().map(|f| f.range)
    }

    pub(crate) fn error(&self) -> Option<StreamError> {
        self.state.lock().error.clone()
    }

    pub(crate) fn stats(&self) -> StatsSnapshot {
        let pending = self.pending_bytes();
        self.stats.snapshot(pending)
    }

    /// Issue a request for the next pending range at or after the position,
    /// unless one is already in flight.
    fn request_next(self: &Arc<Self>, state: &mut TransferState) {
        if state.terminated || state.error.is_some() || state.in_flight.is_some() {
            return;
        }

        let Some(range) = self.next_target(&state.pending, state.position) else {
            if !state.pending.is_empty() {
                debug!(
                    "fetch loop idle: nothing pending past position {}",
                    state.position
                );
            }
            return;
        };

        let id = state.next_request_id;
        state.next_request_id += 1;
        let cancel = CancellationToken::new();
        state.in_flight = Some(InFlight {
            id,
            range,
            cancel: cancel.clone(),
            abort: None,
        });
        self.stats.record_request();
        debug!(
            "range request {} issued bytes={}-{} position={}",
            id, range.start, range.end, state.position
        );

        let transfer = Arc::clone(self);
        self.runtime
            .spawn(async move { transfer.run_request(id, range, cancel).await });
    }

    /// Pending interval the loop fetches next for a reader at `position`.
    fn next_target(&self, pending: &PendingRanges, position: u64) -> Option<Interval> {
        let index = match pending.find_at_or_after(position, false) {
            None if self.fill_behind => pending.find_at_or_after(position, true),
            found => found,
        };
        index.and_then(|i| pending.get(i))
    }

    async fn run_request(self: Arc<Self>, id: u64, range: Interval, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            result = self.fetch_range(id, range) => match result {
                Ok(()) => Outcome::Finished,
                Err(err) => Outcome::Failed(err),
            },
        };
        self.finish_request(id, outcome);
    }

    async fn fetch_range(&self, id: u64, range: Interval) -> Result<(), StreamError> {
        let response = tokio::time::timeout(
            self.request_timeout,
            self.transport.open_range(range.start, range.end),
        )
        .await
        .map_err(|_| {
            StreamError::Timeout(format!(
                "no response for bytes={}-{} within {:?}",
                range.start, range.end, self.request_timeout
            ))
        })?
        .map_err(|e| StreamError::Transport(format!("{:#}", e)))?;

        let served = served_interval(
            response.content_range.as_deref(),
            response.content_length,
            self.length,
        )?;
        if !served.contains(range.start) {
            return Err(StreamError::protocol(format!(
                "asked for bytes {}-{}, response serves {}-{}",
                range.start, range.end, served.start, served.end
            )));
        }
        if served != range {
            debug!(
                "range request {} asked bytes={}-{}, served {}-{}",
                id, range.start, range.end, served.start, served.end
            );
        }

        let mut body = response.body;
        let mut offset = served.start;
        let mut cleared = 0u64;
        while offset <= served.end {
            let chunk = match tokio::time::timeout(self.read_timeout, body.next()).await {
                Err(_) => {
                    return Err(StreamError::Timeout(format!(
                        "response body stalled at offset {}",
                        offset
                    )))
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(|e| StreamError::Transport(e.to_string()))?,
            };
            if chunk.is_empty() {
                continue;
            }

            let take = (chunk.len() as u64).min(served.end - offset + 1) as usize;
            match self.commit(id, offset, &chunk[..take])? {
                Some(n) => cleared += n,
                None => return Ok(()),
            }
            offset += take as u64;
        }

        if offset == served.start {
            return Err(StreamError::protocol(format!(
                "empty body for bytes {}-{}",
                served.start, served.end
            )));
        }
        if cleared == 0 {
            return Err(StreamError::protocol(format!(
                "response for bytes {}-{} ended at {} without reaching a pending byte",
                range.start, range.end, offset
            )));
        }
        if offset <= served.end {
            warn!(
                "range request {} ended early at offset {} of {}-{}",
                id, offset, served.start, served.end
            );
        }
        Ok(())
    }

    /// Write one body chunk and mark it cached, returning how many of its
    /// bytes were still pending. `None` when the request is no longer the
    /// current one and the chunk was dropped.
    fn commit(&self, id: u64, offset: u64, data: &[u8]) -> Result<Option<u64>, StreamError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_current(id) || state.terminated {
            return Ok(None);
        }
        let Some(buffer) = state.buffer.as_mut() else {
            return Ok(None);
        };

        buffer.write_at(offset, data).map_err(StreamError::buffer)?;
        let span = Interval::new(offset, offset + data.len() as u64 - 1);
        let cleared = state.pending.shrink_or_remove(span);
        if cleared > 0 {
            self.data_ready.notify_all();
        }
        self.stats.record_downloaded(data.len() as u64);
        Ok(Some(cleared))
    }

    fn finish_request(self: &Arc<Self>, id: u64, outcome: Outcome) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_current(id) {
            debug!("stale completion for range request {} ignored", id);
            return;
        }
        let Some(in_flight) = state.in_flight.take() else {
            return;
        };

        match outcome {
            Outcome::Finished => debug!("range request {} finished", id),
            Outcome::Cancelled => {
                self.stats.record_abort();
                debug!("range request {} aborted ({:?})", id, in_flight.abort);
            }
            Outcome::Failed(err) => match in_flight.abort {
                Some(reason) => {
                    debug!(
                        "range request {} failed after {:?} abort, ignoring: {}",
                        id, reason, err
                    );
                }
                None => {
                    warn!("range request {} failed: {}", id, err);
                    if state.error.is_none() {
                        state.error = Some(err);
                    }
                }
            },
        }

        if state.pending.is_empty() && state.buffer.is_some() && !state.terminated {
            info!("transfer complete: {} bytes cached", self.length);
        }
        self.data_ready.notify_all();
        self.request_next(state);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::engine::buffer::MemoryBuffer;
    use crate::source::traits::RangeResponse;

    /// Accepts requests and never answers them.
    struct SilentTransport;

    #[async_trait]
    impl RangeTransport for SilentTransport {
        async fn open_range(&self, _start: u64, _end: u64) -> anyhow::Result<RangeResponse> {
            std::future::pending().await
        }
    }

    fn silent_transfer(rt: &tokio::runtime::Runtime) -> Arc<Transfer> {
        Transfer::start(
            Arc::new(SilentTransport),
            Box::new(MemoryBuffer::new(100)),
            &CacheConfig::default(),
            rt.handle().clone(),
        )
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_stale_request_cannot_commit_or_fail_transfer() {
        let rt = runtime();
        let transfer = silent_transfer(&rt);
        assert_eq!(transfer.in_flight(), Some(Interval::new(0, 99)));

        assert_eq!(transfer.commit(42, 0, &[7; 10]).unwrap(), None);
        assert_eq!(transfer.pending_bytes(), 100);

        transfer.finish_request(42, Outcome::Failed(StreamError::protocol("late")));
        assert!(transfer.error().is_none());
        assert_eq!(transfer.in_flight(), Some(Interval::new(0, 99)));
    }

    #[test]
    fn test_failure_after_abort_is_not_terminal() {
        let rt = runtime();
        let transfer = silent_transfer(&rt);

        transfer.state.lock().abort_in_flight(AbortReason::Reposition);
        transfer.finish_request(1, Outcome::Failed(StreamError::Transport("reset".into())));

        // Whichever report for request 1 lands first, the other is stale.
        assert!(transfer.error().is_none());
        let state = transfer.state.lock();
        let next = state.in_flight.as_ref().unwrap();
        assert!(next.id > 1);
        assert!(next.abort.is_none());
        assert_eq!(next.range, Interval::new(0, 99));
    }

    #[test]
    fn test_current_commit_reports_cleared_bytes() {
        let rt = runtime();
        let transfer = silent_transfer(&rt);

        assert_eq!(transfer.commit(1, 10, &[1; 20]).unwrap(), Some(20));
        assert_eq!(transfer.commit(1, 0, &[1; 15]).unwrap(), Some(10));
        assert_eq!(transfer.pending_ranges(), vec![Interval::new(30, 99)]);
    }
}
