use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Time allowed for a ranged request to produce response headers (20 s).
pub const RANGE_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Maximum stall between two body chunks of one response (30 s).
pub const BODY_READ_TIMEOUT_MS: u64 = 30_000;

/// Seeks landing this close past the pending start of the in-flight interval
/// keep the current fetch instead of re-targeting it (4 MB).
pub const SEEK_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// Configuration for a progressive cache transfer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Milliseconds a ranged request may take to return response headers.
    pub request_timeout_ms: u64,
    /// Milliseconds the body of a response may stall between two chunks.
    pub read_timeout_ms: u64,
    /// See [`SEEK_THRESHOLD_BYTES`].
    pub seek_threshold_bytes: u64,
    /// Keep fetching pending ranges behind the read position once everything
    /// ahead of it is cached, until the whole resource is local.
    pub fill_behind: bool,
    /// Directory used for disk-backed buffers. Empty means the system temp dir.
    pub cache_dir: String,
}

impl CacheConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        if self.cache_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.cache_dir)
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: RANGE_REQUEST_TIMEOUT_MS,
            read_timeout_ms: BODY_READ_TIMEOUT_MS,
            seek_threshold_bytes: SEEK_THRESHOLD_BYTES,
            fill_behind: false,
            cache_dir: String::new(),
        }
    }
}
