// Live transfer statistics: fetch and serve throughput, request counts.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

struct StatsSample {
    at: Instant,
    download_bytes: u64,
    serve_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub download_bps: u64,
    pub serve_bps: u64,
    pub downloaded_bytes: u64,
    pub served_bytes: u64,
    pub requests_issued: u32,
    pub requests_aborted: u32,
    pub pending_bytes: u64,
}

pub struct StatsCollector {
    download_bytes_total: AtomicU64,
    serve_bytes_total: AtomicU64,
    requests_issued: AtomicU32,
    requests_aborted: AtomicU32,
    last_sample: Mutex<StatsSample>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            download_bytes_total: AtomicU64::new(0),
            serve_bytes_total: AtomicU64::new(0),
            requests_issued: AtomicU32::new(0),
            requests_aborted: AtomicU32::new(0),
            last_sample: Mutex::new(StatsSample {
                at: Instant::now(),
                download_bytes: 0,
                serve_bytes: 0,
            }),
        }
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.download_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: u64) {
        self.serve_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.requests_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Rates are measured since the previous snapshot.
    pub fn snapshot(&self, pending_bytes: u64) -> StatsSnapshot {
        let now = Instant::now();
        let downloaded_bytes = self.download_bytes_total.load(Ordering::Relaxed);
        let served_bytes = self.serve_bytes_total.load(Ordering::Relaxed);

        let (download_bps, serve_bps) = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();

            let rates = if elapsed > 0.1 {
                let d = ((downloaded_bytes - sample.download_bytes) as f64 / elapsed) as u64;
                let s = ((served_bytes - sample.serve_bytes) as f64 / elapsed) as u64;
                (d, s)
            } else {
                (0, 0)
            };

            sample.at = now;
            sample.download_bytes = downloaded_bytes;
            sample.serve_bytes = served_bytes;

            rates
        };

        StatsSnapshot {
            download_bps,
            serve_bps,
            downloaded_bytes,
            served_bytes,
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            requests_aborted: self.requests_aborted.load(Ordering::Relaxed),
            pending_bytes,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
