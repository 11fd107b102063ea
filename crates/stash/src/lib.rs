//! # Stash
//!
//! A persistent, size-bounded cache for resources fetched over HTTP.
//! Repeated lookups of the same resource are served from disk instead of the
//! network, and the files on disk never add up to more than a configured
//! quota.
//!
//! ## Guarantees
//!
//! - A download either lands as a complete file or leaves nothing behind
//! - Cached bytes never exceed the quota; least recently used entries go first
//! - Concurrent requests for the same resource share a single download
//! - The index is rebuilt from the cache directory on open, no manifest needed
//!
//! ```no_run
//! use std::sync::Arc;
//! use stash_engine::{CacheConfig, CachedFetcher, DownloaderConfig, ONE_GIGABYTE};
//!
//! # async fn run() -> stash_engine::Result<()> {
//! let cache = Arc::new(
//!     CachedFetcher::open(
//!         CacheConfig::new("/var/cache/bisect", ONE_GIGABYTE),
//!         DownloaderConfig::default(),
//!     )
//!     .await?,
//! );
//! let path = cache.get_url("https://archive.example.org/pub/nightly/").await?;
//! println!("listing stored at {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bytes_stream;
pub mod config;
pub mod download;
pub mod error;
pub mod evictor;
pub mod fetcher;
pub mod index;
pub mod key;
pub mod transport;

pub use builder::DownloaderConfigBuilder;
pub use config::{CacheConfig, DownloaderConfig, ONE_GIGABYTE};
pub use download::{AtomicDownloader, DownloadProgress, ProgressFn};
pub use error::{CacheError, Result};
pub use evictor::QuotaEvictor;
pub use fetcher::{CacheStats, CachedFetcher};
pub use index::{CacheEntry, CacheIndex};
pub use key::CacheKey;
pub use transport::{
    BodyStream, HttpTransport, RequestOptions, Transport, TransportResponse, WithDefaults,
    create_client,
};
