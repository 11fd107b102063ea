//! # Cache Keys
//!
//! Keys are the hex SHA-256 digest of the request they stand for. The digest
//! is also the entry's file name, so the index can be recovered from the
//! cache directory alone.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CacheError, Result};

const DIGEST_HEX_LEN: usize = 64;

/// Opaque identifier for a cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from a URL.
    ///
    /// The URL is normalized by parsing (scheme and host are lowercased,
    /// default ports dropped) and its fragment is discarded, since fragments
    /// never reach the server.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut parsed = Url::parse(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        parsed.set_fragment(None);
        Ok(Self::digest(parsed.as_str()))
    }

    /// Derive a key from an arbitrary caller-chosen identifier.
    pub fn from_raw(identifier: impl AsRef<str>) -> Self {
        Self::digest(identifier.as_ref())
    }

    /// Recover a key from a cache file name, if the name is one.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let valid = name.len() == DIGEST_HEX_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(name.to_string()))
    }

    /// File name of the entry backing this key.
    pub fn file_name(&self) -> &str {
        &self.0
    }

    fn digest(input: &str) -> Self {
        let hash = Sha256::digest(input.as_bytes());
        Self(format!("{hash:x}"))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        f.write_str(&self.0[..12])
    }
}
