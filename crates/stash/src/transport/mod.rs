//! # Transport
//!
//! The streaming HTTP GET the downloader consumes. [`HttpTransport`] is the
//! reqwest-backed implementation; [`WithDefaults`] composes any transport with
//! default request options.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;

use crate::error::Result;

mod defaults;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use defaults::WithDefaults;
pub use http::{HttpTransport, create_client};

/// Response body as a stream of chunks of arbitrary size.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// An open response whose body has not been consumed yet.
pub struct TransportResponse {
    /// Length announced by the server, if any. Informational only.
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Fill anything unset in `self` from `defaults`.
    pub fn or_defaults(&self, defaults: &RequestOptions) -> RequestOptions {
        let mut headers = defaults.headers.clone();
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        RequestOptions {
            timeout: self.timeout.or(defaults.timeout),
            headers,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a GET request and return once the response headers are in.
    ///
    /// Non-success statuses are reported as errors here, before any body is
    /// handed out.
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse> {
        (**self).get(url, options).await
    }
}
