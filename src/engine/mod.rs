//! The crawl engine.
//!
//! The engine owns the run loop: seed URLs are admitted through the
//! normalize → match → dedupe pipeline into the work queue, a pool of
//! workers dequeues them, honors robots.txt and rate limits, fetches and
//! scrapes each page, and feeds the scraper's URLs back through the same
//! pipeline. The run ends when every admitted URL has been processed, or
//! on the first worker error, whichever comes first.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::dedupe::{DedupeMap, Deduper};
use crate::fetch::{Client, Fetch, Fetcher, HttpClient, DEFAULT_USER_AGENT};
use crate::limit::Limit;
use crate::page::Page;
use crate::queue::{MemoryQueue, Queue};
use crate::robots::RobotsCache;
use crate::scan::Scannable;
use crate::url::{normalize, Matcher};
use crate::{BoxError, Error, Result};

const ROBOTS_CACHE_CAPACITY: usize = 1000;

/// A page scraper.
///
/// The engine calls `scrape` once per admitted URL with the fetched page;
/// the URLs it returns are fed back into the admission pipeline. Scrapers
/// are shared across workers and invoked concurrently, so they must be
/// `Send + Sync`; a scraper error aborts the whole run.
///
/// Closures with the right signature are scrapers:
///
/// ```
/// use skitter::{BoxError, Engine, Page};
/// use url::Url;
///
/// let engine = Engine::new(|page: &Page| -> Result<Vec<Url>, BoxError> {
///     Ok(page.urls())
/// });
/// ```
pub trait Scraper: Send + Sync {
    fn scrape(&self, page: &Page) -> std::result::Result<Vec<Url>, BoxError>;
}

impl<F> Scraper for F
where
    F: Fn(&Page) -> std::result::Result<Vec<Url>, BoxError> + Send + Sync,
{
    fn scrape(&self, page: &Page) -> std::result::Result<Vec<Url>, BoxError> {
        self(page)
    }
}

/// A scraper that scans each page into `T` and hands it to a sink.
///
/// With no follow selectors configured the crawl follows every URL on the
/// page; otherwise only anchors matching the selectors are followed.
///
/// ```
/// use skitter::{Engine, ScanScraper};
/// # use skitter::{Field, Scannable, Shape, Value};
/// # struct Quote { text: String }
/// # impl Scannable for Quote {
/// #     fn shape() -> Shape {
/// #         Shape::Record(vec![Field::new("text", "span.text", Shape::Text)])
/// #     }
/// #     fn from_value(value: &Value) -> Self {
/// #         Self { text: value.get("text").map(Value::as_text).unwrap_or_default().to_string() }
/// #     }
/// # }
///
/// let scraper = ScanScraper::new(|quote: Quote| println!("{}", quote.text))
///     .follow("li.next > a");
/// let engine = Engine::new(scraper);
/// ```
pub struct ScanScraper<T, F> {
    sink: F,
    selectors: Vec<String>,
    marker: PhantomData<fn() -> T>,
}

impl<T, F> ScanScraper<T, F>
where
    T: Scannable,
    F: Fn(T) + Send + Sync,
{
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            selectors: Vec::new(),
            marker: PhantomData,
        }
    }

    /// Restricts the followed URLs to anchors matching `selector`.
    ///
    /// May be called multiple times; the matches are concatenated.
    pub fn follow(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }
}

impl<T, F> Scraper for ScanScraper<T, F>
where
    T: Scannable,
    F: Fn(T) + Send + Sync,
{
    fn scrape(&self, page: &Page) -> std::result::Result<Vec<Url>, BoxError> {
        let item = page.scan::<T>()?;
        (self.sink)(item);

        if self.selectors.is_empty() {
            return Ok(page.urls());
        }

        let mut next = Vec::new();
        for selector in &self.selectors {
            next.extend(page.next(selector));
        }

        Ok(next)
    }
}

/// Engine configuration.
///
/// Every field has a default; the scraper is the only required piece and
/// is passed to [`Engine::new`] or [`Engine::with_config`] directly.
#[derive(Default)]
pub struct EngineConfig {
    /// URL de-duplicator; the exact in-memory set by default.
    pub deduper: Option<Arc<dyn Deduper>>,

    /// Page fetcher; the built-in HTTP fetcher by default.
    pub fetcher: Option<Arc<dyn Fetch>>,

    /// Work queue; the in-memory queue by default.
    pub queue: Option<Arc<dyn Queue>>,

    /// HTTP client shared by the default fetcher and the robots cache.
    ///
    /// Wrap it in an [`crate::HttpCache`] to crawl through the HTTP cache.
    pub client: Option<Arc<dyn Client>>,

    /// Rate limiters, run in order before every fetch.
    pub limiters: Vec<Arc<dyn Limit>>,

    /// Admission matcher; everything is admitted when unset.
    pub matcher: Option<Arc<dyn Matcher>>,

    /// User agent for pages and robots.txt, `"antbot"` by default.
    pub user_agent: Option<String>,

    /// Skips robots.txt checks and crawl delays entirely.
    pub impolite: bool,

    /// Number of worker tasks, clamped to at least 1.
    pub workers: usize,

    /// Optional cap on concurrently processed pages.
    pub concurrency: Option<usize>,
}

struct Inner {
    scraper: Box<dyn Scraper>,
    deduper: Arc<dyn Deduper>,
    fetcher: Arc<dyn Fetch>,
    queue: Arc<dyn Queue>,
    limiters: Vec<Arc<dyn Limit>>,
    matcher: Option<Arc<dyn Matcher>>,
    robots: RobotsCache,
    user_agent: String,
    impolite: bool,
    workers: usize,
    semaphore: Option<Arc<Semaphore>>,
}

/// The crawl engine.
///
/// Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Returns an engine with the default configuration.
    pub fn new(scraper: impl Scraper + 'static) -> Self {
        Self::with_config(scraper, EngineConfig::default())
    }

    /// Returns an engine with the given configuration.
    pub fn with_config(scraper: impl Scraper + 'static, config: EngineConfig) -> Self {
        let client = config
            .client
            .unwrap_or_else(|| Arc::new(HttpClient::new()));

        let user_agent = config
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let fetcher = config.fetcher.unwrap_or_else(|| {
            Arc::new(Fetcher::new(Arc::clone(&client)).user_agent(user_agent.clone()))
        });

        Self {
            inner: Arc::new(Inner {
                scraper: Box::new(scraper),
                deduper: config
                    .deduper
                    .unwrap_or_else(|| Arc::new(DedupeMap::new())),
                fetcher,
                queue: config.queue.unwrap_or_else(|| Arc::new(MemoryQueue::new())),
                limiters: config.limiters,
                matcher: config.matcher,
                robots: RobotsCache::new(client, ROBOTS_CACHE_CAPACITY),
                user_agent,
                impolite: config.impolite,
                workers: config.workers.max(1),
                semaphore: config
                    .concurrency
                    .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            }),
        }
    }

    /// Runs the engine until the frontier drains.
    ///
    /// Seeds are admitted first, then `workers` workers crawl until all
    /// outstanding work is done. The first worker error cancels the rest
    /// and becomes the result; cancelling `token` stops the run with
    /// [`Error::Cancelled`].
    pub async fn run<I, S>(&self, token: &CancellationToken, seeds: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.enqueue(token, seeds).await?;

        let child = token.child_token();
        let mut workers = JoinSet::new();

        for _ in 0..self.inner.workers {
            let engine = self.clone();
            let token = child.clone();

            workers.spawn(async move {
                let ret = engine.worker(&token).await;
                if ret.is_err() {
                    // The first failure releases everyone else.
                    token.cancel();
                }
                ret
            });
        }

        // Release the workers once all outstanding work is done, or as
        // soon as the run is cancelled or a worker fails.
        tokio::select! {
            _ = self.inner.queue.wait() => {}
            _ = child.cancelled() => {}
        }
        self.inner.queue.close();

        let mut first: Option<Error> = None;
        let mut cancelled = false;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(Error::Cancelled)) => cancelled = true,
                Ok(Err(err)) => {
                    if first.is_none() {
                        first = Some(err);
                    }
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }

        match first {
            Some(err) => Err(err),
            None if cancelled || token.is_cancelled() => Err(Error::Cancelled),
            None => Ok(()),
        }
    }

    /// Admits URLs into the crawl.
    ///
    /// Each URL is parsed, normalized, filtered through the matcher and
    /// the deduper and pushed to the queue. Unparseable and non-http(s)
    /// URLs are a validation error.
    pub async fn enqueue<I, S>(&self, token: &CancellationToken, urls: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();

        for raw in urls {
            let raw = raw.as_ref();
            let url = Url::parse(raw).map_err(|_| Error::InvalidUrl {
                url: raw.to_string(),
            })?;
            parsed.push(url);
        }

        self.admit(token, parsed).await
    }

    /// The admission pipeline for already-parsed URLs.
    async fn admit(&self, token: &CancellationToken, urls: Vec<Url>) -> Result<()> {
        let mut batch = Vec::with_capacity(urls.len());

        for url in urls {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidUrl {
                    url: url.to_string(),
                });
            }

            let url = normalize(url.as_str())?;

            if let Some(matcher) = &self.inner.matcher {
                if !matcher.matches(&url) {
                    continue;
                }
            }

            batch.push(url);
        }

        let fresh = self.inner.deduper.dedupe(batch);

        if fresh.is_empty() {
            return Ok(());
        }

        self.inner.queue.enqueue(token, fresh).await?;

        Ok(())
    }

    /// A single crawl worker.
    async fn worker(&self, token: &CancellationToken) -> Result<()> {
        loop {
            let url = match self.inner.queue.dequeue(token).await {
                Ok(url) => url,
                Err(err) => {
                    return match Error::from(err) {
                        Error::QueueClosed => Ok(()),
                        err => Err(err),
                    };
                }
            };

            let ret = self.process(token, &url).await;
            self.inner.queue.done(&url);

            match ret {
                Ok(()) => {}
                // The monitor closed the queue while this URL was in
                // flight; its children are simply dropped.
                Err(Error::QueueClosed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Processes a single URL: gate, fetch, scrape, enqueue.
    async fn process(&self, token: &CancellationToken, url: &Url) -> Result<()> {
        let _permit = match &self.inner.semaphore {
            Some(semaphore) => {
                let semaphore = Arc::clone(semaphore);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return Ok(()),
                    }
                }
            }
            None => None,
        };

        if !self.inner.impolite {
            let allowed = self
                .inner
                .robots
                .allowed(token, url, &self.inner.user_agent)
                .await?;

            if !allowed {
                tracing::debug!(%url, "disallowed by robots.txt");
                return Ok(());
            }
        }

        for limiter in &self.inner.limiters {
            limiter.limit(token, url).await?;
        }

        if !self.inner.impolite {
            self.inner
                .robots
                .wait(token, url, &self.inner.user_agent)
                .await?;
        }

        let Some(resp) = self.inner.fetcher.fetch(token, url).await? else {
            tracing::debug!(%url, "dead link");
            return Ok(());
        };

        tracing::debug!(%url, status = %resp.status, "scraping");

        let next = {
            let page = Page::from_response(resp);
            self.inner
                .scraper
                .scrape(&page)
                .map_err(|source| Error::Scrape {
                    url: url.clone(),
                    source,
                })?
        };

        self.admit(token, next).await
    }
}
