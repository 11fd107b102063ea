use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::{CacheError, Result};

pub const ONE_GIGABYTE: u64 = 1024 * 1024 * 1024;

/// Chunk size used when streaming response bodies to disk.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

const DEFAULT_USER_AGENT: &str = concat!("stash/", env!("CARGO_PKG_VERSION"));

/// Where the cache lives and how much it may hold.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory of the cache, created if missing
    pub cache_dir: PathBuf,
    /// Ceiling on the total size of cached files in bytes. Zero disables
    /// caching: every fetch goes to the network and nothing is retained.
    pub quota: u64,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, quota: u64) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            quota,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.quota > 0
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::Config("cache directory must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("stash-cache"),
            quota: ONE_GIGABYTE,
        }
    }
}

/// Configurable options for the HTTP side of the cache
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Idle timeout for pooled connections
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Size of the buffer each body read fills before it is written out
    pub chunk_size: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            // Zero means no overall limit; build archives can be large
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            use_system_proxy: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CacheError::Config("chunk size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.quota, ONE_GIGABYTE);
        assert!(config.is_enabled());
        assert!(config.cache_dir.ends_with("stash-cache"));
    }

    #[test]
    fn test_zero_quota_disables_cache() {
        let config = CacheConfig::new("/tmp/stash", 0);
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_cache_dir_rejected() {
        let config = CacheConfig::new("", 10);
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = DownloaderConfig {
            chunk_size: 0,
            ..DownloaderConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }
}
