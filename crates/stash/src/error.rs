use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;

use crate::key::CacheKey;

/// Errors raised by the cache and the downloader feeding it.
///
/// Nothing in this crate retries on any of these; retry policy belongs to the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Network failure fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("Server returned status code {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed writing {path} after {written} bytes: {source}")]
    PartialWrite {
        path: PathBuf,
        written: u64,
        #[source]
        source: io::Error,
    },

    #[error("A resource of {size} bytes can never fit in a quota of {quota} bytes")]
    QuotaTooSmall { size: u64, quota: u64 },

    #[error("Resource {key} from {url} ({size} bytes) exceeds the cache quota of {quota} bytes")]
    ResourceTooLarge {
        key: CacheKey,
        url: String,
        size: u64,
        quota: u64,
    },

    #[error("Cache key {0} is already registered")]
    DuplicateKey(CacheKey),

    #[error("Cache index and disk diverged for {key} at {path}: {reason}")]
    IndexDiskDivergence {
        key: CacheKey,
        path: PathBuf,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that indicate the cache can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::DuplicateKey(_) | CacheError::IndexDiskDivergence { .. }
        )
    }

    /// Errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Network { .. } => true,
            CacheError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let network = CacheError::Network {
            url: "http://example.com".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(network.is_transient());
        assert!(!network.is_fatal());

        let not_found = CacheError::Status {
            url: "http://example.com".to_string(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(!not_found.is_transient());

        let unavailable = CacheError::Status {
            url: "http://example.com".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(unavailable.is_transient());

        let duplicate = CacheError::DuplicateKey(CacheKey::from_raw("a"));
        assert!(duplicate.is_fatal());
        assert!(!duplicate.is_transient());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = CacheError::PartialWrite {
            path: PathBuf::from("/cache/abc.part"),
            written: 42,
            source: io::Error::other("disk full"),
        };
        let message = err.to_string();
        assert!(message.contains("/cache/abc.part"));
        assert!(message.contains("42"));
        assert!(message.contains("disk full"));
    }
}
