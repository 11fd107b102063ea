//! Fluent construction of [`DownloaderConfig`].
//!
//! ```
//! use std::time::Duration;
//! use stash_engine::DownloaderConfig;
//!
//! let config = DownloaderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("bisect/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_chunk_size(64 * 1024)
//!     .build();
//! assert_eq!(config.chunk_size, 64 * 1024);
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::DownloaderConfig;

#[derive(Debug, Clone, Default)]
pub struct DownloaderConfigBuilder {
    inner: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Start from [`DownloaderConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit on a whole request including the body. `Duration::ZERO` means
    /// no limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    /// How long an idle pooled connection is kept.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.inner.read_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.inner.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.inner.user_agent = user_agent.into();
        self
    }

    /// Add one request header on top of the current set. A name or value that
    /// is not valid HTTP is logged and skipped.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let (name, value) = (name.as_ref(), value.as_ref());
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.inner.headers.insert(name, value);
            }
            _ => warn!(name, "Ignoring invalid request header"),
        }
        self
    }

    /// Replace the whole header set, defaults included.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.inner.headers = headers;
        self
    }

    /// `false` makes the client ignore proxy environment variables.
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.inner.use_system_proxy = use_system_proxy;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.inner.chunk_size = chunk_size;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.inner
    }
}
