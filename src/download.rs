//! Centralized download functionality.
//!
//! All snapshot metadata and archive fetches go through [`Fetcher`] for
//! consistent:
//! - Error handling with the URL in every message
//! - A fixed number of retries with backoff
//! - Bounded connect and total time per fetch
//!
//! Fetched bytes are returned to the caller unverified. Every caller hashes
//! them against a value anchored in signed metadata before using them.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Total time for one attempt (connect + body).
    pub timeout: Duration,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Retry attempts after the first failure (default: 3)
    pub retries: u32,
    /// Delay before the first retry, doubling each retry (default: 1 second)
    pub retry_delay: Duration,
    /// Refuse bodies larger than this.
    pub max_bytes: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(20),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Something that can fetch a URL into memory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, retrying transient failures. The error names the URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

// =============================================================================
// HTTP Downloads
// =============================================================================

/// [`Fetcher`] over HTTP(S) with reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
    options: DownloadOptions,
}

impl HttpFetcher {
    pub fn new(options: DownloadOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("oracle-image/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(options.connect_timeout)
            .timeout(options.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, options })
    }

    /// Single HTTP download attempt.
    async fn attempt(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "HTTP {} for {}: {}",
                status.as_u16(),
                url,
                status.canonical_reason().unwrap_or("Unknown error")
            );
        }

        if let Some(len) = response.content_length() {
            if len > self.options.max_bytes {
                bail!(
                    "{} is {} bytes, above the {} byte limit",
                    url,
                    len,
                    self.options.max_bytes
                );
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.options.max_bytes {
                bail!("{} exceeded the {} byte limit", url, self.options.max_bytes);
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 0..=self.options.retries {
            if attempt > 0 {
                let delay = self.options.retry_delay * (1 << (attempt - 1).min(4));
                eprintln!(
                    "    [WARN] Retry {}/{} for {} in {:?}",
                    attempt, self.options.retries, url, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    if !is_retryable_error(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Download failed for {}", url))
            .context(format!(
                "Giving up on {} after {} attempts",
                url,
                self.options.retries + 1
            )))
    }
}

/// Client errors other than timeouts and rate limiting will not change on
/// retry; everything else (I/O, 5xx, resets) might.
fn is_retryable_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string();
    let permanent_4xx = ["HTTP 400", "HTTP 401", "HTTP 403", "HTTP 404", "HTTP 410"];
    !permanent_4xx.iter().any(|code| msg.starts_with(code))
}
