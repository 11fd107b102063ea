//! # Atomic Downloader
//!
//! Streams a resource into `<destination>.part` and renames it over the
//! destination only once the whole body is on disk. Any failure, including the
//! future being dropped mid-transfer, removes the `.part` file and leaves the
//! destination exactly as it was.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::bytes_stream::BytesStreamReader;
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{CacheError, Result};
use crate::transport::{RequestOptions, Transport, TransportResponse};

pub const PART_SUFFIX: &str = ".part";

/// Progress of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    /// Length the server announced, if any
    pub total_bytes: Option<u64>,
}

/// Called with the URL and the transfer state after every chunk written.
pub type ProgressFn = Arc<dyn Fn(&str, DownloadProgress) + Send + Sync>;

#[derive(Clone)]
pub struct AtomicDownloader {
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    progress: Option<ProgressFn>,
}

impl AtomicDownloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Path of the temporary file used while downloading to `destination`.
    pub fn part_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(PART_SUFFIX);
        destination.with_file_name(name)
    }

    /// Download `url` to `destination`, returning the number of bytes written.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = self.transport.get(url, &RequestOptions::default()).await?;

        let part = Self::part_path(destination);
        let mut guard = PartFileGuard::new(part.clone());

        let written = self.stream_to_part(url, response, &part).await?;

        fs::rename(&part, destination)
            .await
            .map_err(|e| CacheError::PartialWrite {
                path: destination.to_path_buf(),
                written,
                source: e,
            })?;
        guard.disarm();

        debug!(url, path = ?destination, size = written, "Download published");
        Ok(written)
    }

    async fn stream_to_part(
        &self,
        url: &str,
        response: TransportResponse,
        part: &Path,
    ) -> Result<u64> {
        let TransportResponse {
            content_length,
            body,
        } = response;

        let partial = |written: u64| {
            move |e| CacheError::PartialWrite {
                path: part.to_path_buf(),
                written,
                source: e,
            }
        };

        let mut file = fs::File::create(part).await.map_err(partial(0))?;
        let mut reader = BytesStreamReader::new(body);
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| CacheError::Network {
                    url: url.to_string(),
                    source: e,
                })?;
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n]).await.map_err(partial(written))?;
            written += n as u64;

            if let Some(progress) = &self.progress {
                progress(
                    url,
                    DownloadProgress {
                        bytes_written: written,
                        total_bytes: content_length,
                    },
                );
            }
        }

        file.flush().await.map_err(partial(written))?;
        file.sync_all().await.map_err(partial(written))?;

        if let Some(expected) = content_length {
            if expected != written {
                warn!(url, expected, written, "Body length differs from declared Content-Length");
            }
        }

        Ok(written)
    }
}

impl std::fmt::Debug for AtomicDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicDownloader")
            .field("chunk_size", &self.chunk_size)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

/// Deletes the `.part` file when dropped unless disarmed.
struct PartFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to remove partial download"),
        }
    }
}
