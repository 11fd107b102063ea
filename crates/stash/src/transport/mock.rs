//! In-memory [`Transport`] double for unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use reqwest::StatusCode;

use super::{RequestOptions, Transport, TransportResponse};
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
pub(crate) struct MockResource {
    body: Bytes,
    /// Size of the frames the body is delivered in
    frame: usize,
    /// Break the connection after this many bytes
    fail_after: Option<usize>,
}

impl MockResource {
    pub(crate) fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            frame: 7,
            fail_after: None,
        }
    }

    pub(crate) fn failing_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    resources: Mutex<HashMap<String, MockResource>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every response back for `delay` before returning it.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn serve(&self, url: &str, resource: MockResource) {
        self.resources.lock().insert(url.to_string(), resource);
    }

    pub(crate) fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, _options: &RequestOptions) -> Result<TransportResponse> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(url.to_string()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let Some(resource) = self.resources.lock().get(url).cloned() else {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
            });
        };

        let limit = resource.fail_after.unwrap_or(resource.body.len());
        let mut frames: Vec<io::Result<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < limit {
            let end = (offset + resource.frame).min(limit);
            frames.push(Ok(resource.body.slice(offset..end)));
            offset = end;
        }
        if resource.fail_after.is_some() {
            frames.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }

        Ok(TransportResponse {
            content_length: Some(resource.body.len() as u64),
            body: stream::iter(frames).boxed(),
        })
    }
}
