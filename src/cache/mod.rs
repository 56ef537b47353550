//! An HTTP cache that wraps any [`Client`].
//!
//! The cache sits between the fetcher and the transport. For each cacheable
//! request it looks up a stored response, serves it when fresh, validates
//! it with a conditional request when stale, and falls through to the
//! origin otherwise. Hits are marked with an `X-From-Cache: 1` header.
//!
//! Two strategies are provided: the default RFC 7234 behavior and an
//! aggressive mode that trusts nothing but the response's `Date` header.
//! Storage is pluggable; [`MemoryStore`] is the default and [`DiskStore`]
//! persists responses across runs.

mod aggressive;
mod directives;
mod disk;
mod memory;
mod rfc7234;
mod wire;

pub use disk::{DiskStore, DiskStoreBuilder};
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderName, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, VARY,
};
use reqwest::StatusCode;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::fetch::{Client, ClientError, HeaderMap, Request, Response};

const X_FROM_CACHE: HeaderName = HeaderName::from_static("x-from-cache");

/// Freshness of a stored response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The stored response may be served as-is.
    Fresh,
    /// The stored response must be validated with the origin.
    Stale,
    /// The cache must act as if nothing was stored.
    Transparent,
}

/// A cache strategy.
pub(crate) trait Strategy: Send + Sync {
    /// Returns true if the request may use and populate the cache.
    fn cacheable(&self, req: &Request) -> bool;

    /// Returns true if the response may be stored.
    fn storable(&self, req: &Request, resp: &Response) -> bool;

    /// Classifies a stored response against the presented request.
    fn freshness(&self, req: &Request, stored: &Response) -> Freshness;
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage expects a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("storage codec {path}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: snap::Error,
    },
}

/// Cache storage.
///
/// Implementations must be safe for concurrent callers. Values are opaque
/// byte blobs; a load must return exactly what was stored under the key.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn store(&self, key: u64, value: Bytes) -> Result<(), StorageError>;

    /// Returns `None` when nothing is stored under the key.
    async fn load(&self, key: u64) -> Result<Option<Bytes>, StorageError>;
}

/// A caching HTTP client.
///
/// ```no_run
/// use std::sync::Arc;
/// use skitter::{HttpCache, HttpClient};
///
/// let client = HttpCache::new(Arc::new(HttpClient::new()));
/// ```
pub struct HttpCache {
    client: Arc<dyn Client>,
    strategy: Box<dyn Strategy>,
    storage: Arc<dyn Storage>,
}

impl HttpCache {
    /// Returns a cache over `client` with the RFC 7234 strategy and
    /// in-memory storage.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            strategy: Box::new(rfc7234::Rfc7234),
            storage: Arc::new(MemoryStore::new()),
        }
    }

    /// Replaces the storage backend.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Switches to the aggressive strategy.
    ///
    /// Responses are served from the cache until they are older than
    /// `age`; a zero age means the default of 24 hours.
    pub fn aggressive(mut self, age: Duration) -> Self {
        self.strategy = Box::new(aggressive::Aggressive::new(age));
        self
    }

    /// Loads and re-parses the stored response for `key`.
    ///
    /// Storage and framing failures are logged and degrade to a miss, the
    /// cache never turns a load error into a request error.
    async fn lookup(&self, key: u64, req: &Request) -> Option<Response> {
        let data = match self.storage.load(key).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache load");
                return None;
            }
        };

        match wire::parse(data, req.url.clone()) {
            Ok(resp) => Some(resp),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache parse");
                None
            }
        }
    }

    /// Stores a response, logging failures.
    async fn persist(&self, key: u64, resp: &Response) {
        if let Err(err) = self.storage.store(key, wire::dump(resp)).await {
            tracing::warn!(key, error = %err, "cache store");
        }
    }

    /// Validates a stale stored response with the origin.
    ///
    /// <https://tools.ietf.org/html/rfc7234#section-4.3>
    async fn validate(
        &self,
        key: u64,
        req: Request,
        stored: Response,
    ) -> Result<Response, ClientError> {
        let mut vreq = req.clone();

        if let Some(etag) = stored.headers.get(ETAG) {
            if !vreq.headers.contains_key(IF_NONE_MATCH) {
                vreq.headers.insert(IF_NONE_MATCH, etag.clone());
            }
        }

        if let Some(modified) = stored.headers.get(LAST_MODIFIED) {
            if !vreq.headers.contains_key(IF_MODIFIED_SINCE) {
                vreq.headers.insert(IF_MODIFIED_SINCE, modified.clone());
            }
        }

        let origin = self.client.perform(vreq).await?;

        // On a server error the cache may fall back to the stored response
        // when the request opted in with stale-if-error.
        if origin.status.is_server_error() {
            if directives::directives_from(&req.headers).has("stale-if-error") {
                return Ok(stored);
            }
            return Ok(origin);
        }

        // 304 means the stored response can be updated and reused.
        if origin.status == StatusCode::NOT_MODIFIED {
            let mut merged = stored;
            merge(&mut merged.headers, &origin.headers);
            self.persist(key, &merged).await;
            return Ok(merged);
        }

        // A full response replaces the stored one when storable.
        if self.strategy.storable(&req, &origin) {
            self.persist(key, &origin).await;
        }

        Ok(origin)
    }
}

#[async_trait]
impl Client for HttpCache {
    async fn perform(&self, req: Request) -> Result<Response, ClientError> {
        if !self.strategy.cacheable(&req) {
            return self.client.perform(req).await;
        }

        let key = fingerprint(&req);

        if let Some(stored) = self.lookup(key, &req).await {
            match self.strategy.freshness(&req, &stored) {
                Freshness::Fresh => {
                    let mut resp = stored;
                    resp.headers.insert(X_FROM_CACHE, HeaderValue::from_static("1"));
                    return Ok(resp);
                }
                Freshness::Stale => return self.validate(key, req, stored).await,
                Freshness::Transparent => {}
            }
        }

        let resp = self.client.perform(req.clone()).await?;

        if self.strategy.storable(&req, &resp) {
            self.persist(key, &resp).await;
        }

        Ok(resp)
    }
}

/// Returns the request fingerprint, a 64-bit hash of `METHOD:url`.
pub(crate) fn fingerprint(req: &Request) -> u64 {
    let mut keyed = String::with_capacity(req.url.as_str().len() + 8);
    keyed.push_str(req.method.as_str());
    keyed.push(':');
    keyed.push_str(req.url.as_str());
    xxh3_64(keyed.as_bytes())
}

/// Merges origin headers into stored headers.
///
/// Hop-by-hop headers are connection metadata and are never copied.
///
/// <https://tools.ietf.org/html/rfc7234#section-4.3.4>
pub(crate) fn merge(stored: &mut HeaderMap, origin: &HeaderMap) {
    const HOP_BY_HOP: &[&str] = &[
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    for name in origin.keys() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }

        stored.remove(name);
        for value in origin.get_all(name) {
            stored.append(name.clone(), value.clone());
        }
    }
}

/// Checks the header fields nominated by the Vary header.
///
/// <https://tools.ietf.org/html/rfc7234#section-4.1>
pub(crate) fn vary_matches(req: &Request, stored: &Response) -> bool {
    let Some(vary) = req.headers.get(VARY).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    for name in directives::split(vary) {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if req.headers.get(&name) != stored.headers.get(&name) {
            return false;
        }
    }

    true
}
