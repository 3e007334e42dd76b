// Scripted in-process transport for driving the fetch loop deterministically.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;

use ma_cache_stream::{RangeResponse, RangeTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Range` matching the request.
    Exact,
    /// No `Content-Range`, the whole resource as body.
    WholeBody,
    Malformed,
    WrongTotal,
    /// Always serves the first chunk of the resource, whatever was asked.
    Head,
}

pub struct ScriptedTransport {
    data: Arc<Vec<u8>>,
    chunk_size: usize,
    framing: Framing,
    /// Stop each body after this many chunks.
    body_chunks: Option<usize>,
    /// One permit per response allowed to return its headers.
    pub open_gate: Option<Arc<Semaphore>>,
    /// One permit per body chunk allowed through.
    pub chunk_gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<(u64, u64)>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data: Arc::new(data),
            chunk_size,
            framing: Framing::Exact,
            body_chunks: None,
            open_gate: None,
            chunk_gate: None,
            requests: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_body_chunks(mut self, n: usize) -> Self {
        self.body_chunks = Some(n);
        self
    }

    pub fn with_open_gate(mut self) -> Self {
        self.open_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_chunk_gate(mut self) -> Self {
        self.chunk_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_chunks(&self, n: usize) {
        self.chunk_gate.as_ref().expect("chunk gate").add_permits(n);
    }

    pub fn release_opens(&self, n: usize) {
        self.open_gate.as_ref().expect("open gate").add_permits(n);
    }

    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Counts a request as active from open until its body is dropped.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>, max_active: &Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RangeTransport for ScriptedTransport {
    async fn open_range(&self, start: u64, end: u64) -> Result<RangeResponse> {
        self.requests.lock().push((start, end));
        let guard = ActiveGuard::new(&self.active, &self.max_active);

        if let Some(gate) = &self.open_gate {
            gate.acquire().await?.forget();
        }

        let total = self.data.len() as u64;
        let (start, end) = match self.framing {
            Framing::WholeBody => (0, total - 1),
            Framing::Head => (0, (self.chunk_size as u64).min(total) - 1),
            _ => (start, end.min(total - 1)),
        };
        let (content_range, content_length) = match self.framing {
            Framing::Exact | Framing::Head => (
                Some(format!("bytes {}-{}/{}", start, end, total)),
                Some(end - start + 1),
            ),
            Framing::WholeBody => (None, Some(total)),
            Framing::Malformed => (Some("bytes garbage".to_string()), None),
            Framing::WrongTotal => (
                Some(format!("bytes {}-{}/{}", start, end, total + 1)),
                None,
            ),
        };

        let chunks: Vec<Bytes> = self.data[start as usize..=end as usize]
            .chunks(self.chunk_size)
            .take(self.body_chunks.unwrap_or(usize::MAX))
            .map(Bytes::copy_from_slice)
            .collect();
        let gate = self.chunk_gate.clone();
        let body = futures_util::stream::unfold(
            (chunks.into_iter(), gate, guard),
            |(mut chunks, gate, guard)| async move {
                let chunk = chunks.next()?;
                if let Some(gate) = &gate {
                    gate.acquire().await.ok()?.forget();
                }
                Some((Ok::<_, std::io::Error>(chunk), (chunks, gate, guard)))
            },
        )
        .boxed();

        Ok(RangeResponse {
            content_range,
            content_length,
            body,
        })
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or five seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
