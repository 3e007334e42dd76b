use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use reqwest::{header, Client, RequestBuilder, Response};
use tracing::{debug, warn};

use super::traits::{RangeResponse, RangeTransport, SourceInfo};

pub struct HttpSource {
    client: Client,
    url: Arc<RwLock<String>>,
    headers: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpSource {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self::with_client(Client::new(), url, headers)
    }

    pub fn with_client(client: Client, url: String, headers: HashMap<String, String>) -> Self {
        Self {
            client,
            url: Arc::new(RwLock::new(url)),
            headers: Arc::new(RwLock::new(headers)),
        }
    }

    /// Update the URL and headers (e.g. after token refresh).
    ///
    /// Takes effect from the next ranged request on.
    pub fn update_auth(&self, new_url: String, new_headers: HashMap<String, String>) {
        if !new_url.trim().is_empty() {
            *self.url.write() = new_url;
        }
        if !new_headers.is_empty() {
            *self.headers.write() = new_headers;
        }
    }

    /// Build a GET request with the current URL, custom headers and a Range header.
    fn build_request(&self, range_header: &str) -> RequestBuilder {
        let url = self.url.read().clone();
        let headers = self.headers.read().clone();

        let mut req = self.client.get(&url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req.header(header::RANGE, range_header)
    }

    async fn send_checked(&self, range: &str) -> Result<Response> {
        let resp = self.build_request(range).send().await?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 || status == 412 {
            warn!("http auth rejected status={} range={}", status, range);
            return Err(anyhow!("auth_rejected: HTTP {}", status));
        }
        if !resp.status().is_success() {
            warn!("http request failed status={} range={}", status, range);
            return Err(anyhow!("range request failed: HTTP {}", status));
        }
        Ok(resp)
    }

    /// Probe the resource with a one-byte range request.
    pub async fn probe(&self) -> Result<SourceInfo> {
        let resp = self.send_checked("bytes=0-0").await?;
        debug!("http probe status={}", resp.status().as_u16());

        // Content-Range: bytes 0-0/<total>
        let supports_range = resp.status().as_u16() == 206;
        let content_length = if supports_range {
            header_str(&resp, header::CONTENT_RANGE)
                .and_then(|v| v.rsplit('/').next().map(str::to_string))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        } else {
            resp.content_length().unwrap_or(0)
        };

        let content_type = header_str(&resp, header::CONTENT_TYPE)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(SourceInfo {
            content_length,
            content_type,
            supports_range,
        })
    }
}

fn header_str(resp: &Response, name: header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl RangeTransport for HttpSource {
    async fn open_range(&self, start: u64, end: u64) -> Result<RangeResponse> {
        let range = format!("bytes={}-{}", start, end);
        let resp = self.send_checked(&range).await?;

        let content_range = header_str(&resp, header::CONTENT_RANGE);
        let content_length = resp.content_length();
        debug!(
            "http range opened range={} status={} content_range={:?} content_length={:?}",
            range,
            resp.status().as_u16(),
            content_range,
            content_length
        );

        let body = resp.bytes_stream().map_err(io::Error::other).boxed();
        Ok(RangeResponse {
            content_range,
            content_length,
            body,
        })
    }
}
