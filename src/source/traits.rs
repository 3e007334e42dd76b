use std::io;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub struct SourceInfo {
    pub content_length: u64,
    pub content_type: String,
    pub supports_range: bool,
}

/// Response to a ranged request: the framing headers plus the body as a
/// stream of chunks, as delivered by the transport.
pub struct RangeResponse {
    /// Raw `Content-Range` value, if the response carried one.
    pub content_range: Option<String>,
    /// Declared body length (`Content-Length`), if known.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Issues ranged requests against one remote resource.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Request the inclusive byte range `[start, end]`.
    async fn open_range(&self, start: u64, end: u64) -> Result<RangeResponse>;
}
