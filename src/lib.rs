//! Skitter: a polite, concurrent web crawling engine.
//!
//! The crate is built around a fixed-point iteration: seed URLs flow through
//! an admission pipeline (normalize, match, dedupe) into a work queue, worker
//! tasks fetch and scrape pages, and the URLs a scraper returns flow through
//! the same pipeline until the frontier drains.
//!
//! Politeness is enforced per host via robots.txt (allow rules and crawl
//! delays) and per URL via token-bucket rate limiters. Fetches may be routed
//! through an RFC 7234 HTTP cache backed by memory or a crash-safe disk
//! store.
//!
//! ```no_run
//! use skitter::{BoxError, Engine, Page};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn example() -> skitter::Result<()> {
//! let engine = Engine::new(|page: &Page| -> Result<Vec<Url>, BoxError> {
//!     println!("{}", page.url());
//!     Ok(page.urls())
//! });
//!
//! engine.run(&CancellationToken::new(), ["https://example.com"]).await
//! # }
//! ```

pub mod cache;
pub mod dedupe;
pub mod engine;
pub mod fetch;
pub mod limit;
pub mod page;
pub mod queue;
pub mod robots;
pub mod scan;
pub mod url;

use thiserror::Error;

/// A boxed error returned by user-supplied scrapers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for crawl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation was interrupted by cancellation.
    #[error("cancelled")]
    Cancelled,

    /// A URL could not be admitted into the crawl.
    #[error("cannot enqueue invalid URL {url:?}")]
    InvalidUrl { url: String },

    /// The work queue was closed while the operation was in flight.
    #[error("queue closed")]
    QueueClosed,

    #[error(transparent)]
    Fetch(fetch::FetchError),

    #[error(transparent)]
    Client(#[from] fetch::ClientError),

    #[error(transparent)]
    Scan(#[from] scan::ScanError),

    #[error(transparent)]
    Storage(#[from] cache::StorageError),

    /// A scraper failed on a page; fatal to the run.
    #[error("scrape {url}: {source}")]
    Scrape { url: ::url::Url, source: BoxError },
}

impl Error {
    /// Returns true if the error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<fetch::FetchError> for Error {
    fn from(err: fetch::FetchError) -> Self {
        match err {
            fetch::FetchError::Cancelled => Error::Cancelled,
            other => Error::Fetch(other),
        }
    }
}

impl From<queue::QueueError> for Error {
    fn from(err: queue::QueueError) -> Self {
        match err {
            queue::QueueError::Closed => Error::QueueClosed,
            queue::QueueError::Cancelled => Error::Cancelled,
        }
    }
}

/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, Error>;

// Re-export commonly used types.
pub use crate::cache::{DiskStore, HttpCache, MemoryStore, Storage};
pub use crate::dedupe::{DedupeBloom, DedupeMap, Deduper};
pub use crate::engine::{Engine, EngineConfig, ScanScraper, Scraper};
pub use crate::fetch::{Client, Fetch, Fetcher, HttpClient, Request, Response};
pub use crate::limit::{Limit, Limiter};
pub use crate::page::Page;
pub use crate::queue::{MemoryQueue, Queue};
pub use crate::robots::RobotsCache;
pub use crate::scan::{Field, Scannable, Shape, Value};
pub use crate::url::{match_hostname, match_pattern, match_regex, normalize, Matcher};
