//! Firmware asset download
//!
//! A download attempt streams the response body into an [`AssetSink`] and is
//! bounded as a whole by the connection timeout. Retrying is the caller's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, info};

use crate::config::OtaConfig;
use crate::error::{ConfigError, DownloadError};

/// Destination for downloaded bytes
pub trait AssetSink: Send {
    /// Discard everything received so far
    fn reset(&mut self);

    /// Append a chunk
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), DownloadError>;

    /// Bytes received so far
    fn received(&self) -> u64;
}

/// In-memory sink bounded by the slot capacity
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    data: Vec<u8>,
    limit: u64,
}

impl ImageBuffer {
    /// Create a buffer that refuses more than `limit` bytes
    pub fn with_limit(limit: u64) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    /// Take the received bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Received bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl AssetSink for ImageBuffer {
    fn reset(&mut self) {
        self.data.clear();
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        let total = self.received().saturating_add(chunk.len() as u64);
        if total > self.limit {
            return Err(DownloadError::TooLarge { limit: self.limit });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    fn received(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Fetches a firmware asset into a sink
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Perform one download attempt
    ///
    /// `expected_size` of zero means the size is unknown.
    async fn fetch_asset(
        &self,
        location: &str,
        expected_size: u64,
        sink: &mut dyn AssetSink,
    ) -> Result<u64, DownloadError>;
}

/// HTTP asset downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    token: Option<String>,
    timeout: Duration,
}

impl Downloader {
    /// Create a downloader from the agent configuration
    pub fn new(config: &OtaConfig) -> Result<Self, ConfigError> {
        Self::with_timeout(
            config.connection_timeout,
            config.release.bearer_token().map(str::to_string),
        )
    }

    /// Create a downloader with an explicit per-attempt timeout
    pub fn with_timeout(timeout: Duration, token: Option<String>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("otaguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            token,
            timeout,
        })
    }

    async fn stream_into(
        &self,
        location: &str,
        sink: &mut dyn AssetSink,
    ) -> Result<u64, DownloadError> {
        let mut request = self
            .client
            .get(location)
            .header(ACCEPT, "application/octet-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| DownloadError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
            });
        }

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Connection(e.to_string()))?
        {
            sink.write_chunk(&chunk)?;
        }

        Ok(sink.received())
    }
}

#[async_trait]
impl AssetFetcher for Downloader {
    async fn fetch_asset(
        &self,
        location: &str,
        expected_size: u64,
        sink: &mut dyn AssetSink,
    ) -> Result<u64, DownloadError> {
        sink.reset();
        info!(size = expected_size, "Downloading firmware from {}", location);

        let received = tokio::time::timeout(self.timeout, self.stream_into(location, sink))
            .await
            .map_err(|_| DownloadError::Timeout {
                timeout: self.timeout,
            })??;

        if expected_size > 0 && received != expected_size {
            return Err(DownloadError::SizeMismatch {
                expected: expected_size,
                actual: received,
            });
        }

        debug!(bytes = received, "Download complete");
        Ok(received)
    }
}
