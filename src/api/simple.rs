use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use anyhow::{anyhow, Result};
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::CacheConfig;
use crate::engine::buffer::MmapBuffer;
use crate::engine::stream::ProgressiveCacheStream;
use crate::source::http_source::HttpSource;

static INIT_TRACING: Once = Once::new();
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("cache stream tracing initialized");
    });
}

/// Probe `url`, preallocate a disk buffer of its length under the configured
/// cache directory and start streaming it.
///
/// Must be called inside a tokio runtime; fetch tasks run on it. Reads on
/// the returned stream block and belong on a non-async thread.
pub async fn open_http_stream(
    url: String,
    headers: HashMap<String, String>,
    config: &CacheConfig,
) -> Result<ProgressiveCacheStream> {
    let source = Arc::new(HttpSource::new(url, headers));

    let info = source.probe().await?;
    if info.content_length == 0 {
        return Err(anyhow!("source content_length is 0"));
    }
    debug!(
        "http stream probed: {} bytes, type={} range={}",
        info.content_length, info.content_type, info.supports_range
    );

    let name = format!(
        "stream-{}-{}",
        std::process::id(),
        NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)
    );
    let buffer = MmapBuffer::new(&config.cache_dir(), &name, info.content_length)?;

    Ok(ProgressiveCacheStream::new(
        source,
        Box::new(buffer),
        config,
        Handle::current(),
    ))
}
