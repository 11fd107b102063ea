use async_trait::async_trait;

use super::{RequestOptions, Transport, TransportResponse};
use crate::error::Result;

/// Wraps a transport so every request starts from a set of default options.
///
/// Options passed with a request still win over the defaults.
#[derive(Debug, Clone)]
pub struct WithDefaults<T> {
    inner: T,
    defaults: RequestOptions,
}

impl<T> WithDefaults<T> {
    pub fn new(inner: T, defaults: RequestOptions) -> Self {
        Self { inner, defaults }
    }

    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for WithDefaults<T> {
    async fn get(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse> {
        let merged = options.or_defaults(&self.defaults);
        self.inner.get(url, &merged).await
    }
}
