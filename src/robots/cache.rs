//! The per-host robots.txt cache.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::parser::RobotsRecord;
use crate::fetch::{Client, Request};
use crate::Error;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// A cached robots.txt record with its fetch time.
#[derive(Debug)]
struct HostRecord {
    record: RobotsRecord,
    fetched_at: Instant,
}

/// An LRU robots.txt cache keyed by host.
///
/// On a miss the cache fetches `{scheme}://{host}/robots.txt` through the
/// shared HTTP client, parses it and stores the record for an hour. A
/// response with status 400 or above, and any transport failure, stores a
/// permissive record.
///
/// Expiration is passive, an expired record is detected on lookup and
/// refetched. Concurrent misses for the same host may issue duplicate
/// robots.txt requests; the last writer wins and the records are
/// equivalent, so correctness is preserved.
pub struct RobotsCache {
    lru: Mutex<LruCache<String, Arc<HostRecord>>>,
    client: Arc<dyn Client>,
    ttl: Duration,
}

impl RobotsCache {
    /// Returns a cache holding records for up to `capacity` hosts.
    pub fn new(client: Arc<dyn Client>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");

        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            client,
            ttl: DEFAULT_TTL,
        }
    }

    /// Overrides the record time-to-live, one hour by default.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns true if `user_agent` may fetch `url`.
    ///
    /// The agent defaults to `*` when empty.
    pub async fn allowed(
        &self,
        token: &CancellationToken,
        url: &Url,
        user_agent: &str,
    ) -> Result<bool, Error> {
        let host = self.lookup(token, url, user_agent).await?;
        Ok(host.record.is_allowed(url.as_str(), agent_or_wildcard(user_agent)))
    }

    /// Blocks for the crawl delay the host requests from `user_agent`.
    ///
    /// Returns immediately when the matching group has no delay; returns
    /// [`Error::Cancelled`] when cancelled mid-sleep.
    pub async fn wait(
        &self,
        token: &CancellationToken,
        url: &Url,
        user_agent: &str,
    ) -> Result<(), Error> {
        let host = self.lookup(token, url, user_agent).await?;

        if let Some(delay) = host.record.crawl_delay(agent_or_wildcard(user_agent)) {
            if delay > 0.0 {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
                }
            }
        }

        Ok(())
    }

    /// Returns the record for the URL's host, fetching it on a miss or
    /// after expiry.
    async fn lookup(
        &self,
        token: &CancellationToken,
        url: &Url,
        user_agent: &str,
    ) -> Result<Arc<HostRecord>, Error> {
        let key = crate::url::host_key(url);

        if let Some(host) = self.lru.lock().get(&key) {
            if host.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(host));
            }
        }

        let record = self.fetch(token, url, user_agent).await?;
        let host = Arc::new(HostRecord {
            record,
            fetched_at: Instant::now(),
        });

        self.lru.lock().put(key, Arc::clone(&host));

        Ok(host)
    }

    /// Fetches and parses the host's robots.txt.
    async fn fetch(
        &self,
        token: &CancellationToken,
        url: &Url,
        user_agent: &str,
    ) -> Result<RobotsRecord, Error> {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        let mut req = Request::get(robots_url.clone());
        if let Ok(agent) = HeaderValue::from_str(agent_or_wildcard(user_agent)) {
            req = req.header(USER_AGENT, agent);
        }

        let resp = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            resp = self.client.perform(req) => resp,
        };

        let record = match resp {
            Ok(resp) if resp.status.as_u16() < 400 => {
                RobotsRecord::parse(&String::from_utf8_lossy(&resp.body))
            }
            Ok(resp) => {
                tracing::debug!(url = %robots_url, status = %resp.status, "permissive robots record");
                RobotsRecord::allow_all()
            }
            Err(err) => {
                tracing::debug!(url = %robots_url, error = %err, "permissive robots record");
                RobotsRecord::allow_all()
            }
        };

        Ok(record)
    }
}

fn agent_or_wildcard(user_agent: &str) -> &str {
    if user_agent.is_empty() {
        "*"
    } else {
        user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ClientError, HeaderMap, Method, Response, StatusCode};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed robots.txt body and counts requests.
    struct RobotsServer {
        status: u16,
        body: &'static str,
        requests: AtomicUsize,
    }

    impl RobotsServer {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                requests: AtomicUsize::new(0),
            })
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Client for RobotsServer {
        async fn perform(&self, req: Request) -> Result<Response, ClientError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.url.path(), "/robots.txt");

            Ok(Response {
                url: req.url,
                status: StatusCode::from_u16(self.status).unwrap(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    struct FailingClient;

    #[async_trait]
    impl Client for FailingClient {
        async fn perform(&self, req: Request) -> Result<Response, ClientError> {
            Err(ClientError::Transport {
                method: Method::GET,
                url: req.url,
                message: "connection refused".to_string(),
                temporary: true,
            })
        }
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_allowed() {
        let server = RobotsServer::new(200, "User-agent: *\nDisallow: /private/");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        let ok = cache
            .allowed(&token, &url("https://example.com/public"), "antbot")
            .await
            .unwrap();
        assert!(ok);

        let denied = cache
            .allowed(&token, &url("https://example.com/private/x"), "antbot")
            .await
            .unwrap();
        assert!(!denied);
    }

    #[tokio::test]
    async fn test_record_is_cached_per_host() {
        let server = RobotsServer::new(200, "User-agent: *\nDisallow:");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        for path in ["/a", "/b", "/c"] {
            let target = url(&format!("https://example.com{}", path));
            cache.allowed(&token, &target, "antbot").await.unwrap();
        }

        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_expired_record_is_refetched() {
        let server = RobotsServer::new(200, "User-agent: *\nDisallow:");
        let cache = RobotsCache::new(server.clone(), 10).ttl(Duration::ZERO);
        let token = CancellationToken::new();

        let target = url("https://example.com/");
        cache.allowed(&token, &target, "antbot").await.unwrap();
        cache.allowed(&token, &target, "antbot").await.unwrap();

        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_missing_robots_is_permissive() {
        let server = RobotsServer::new(404, "");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        let ok = cache
            .allowed(&token, &url("https://example.com/anything"), "antbot")
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_transport_failure_is_permissive() {
        let cache = RobotsCache::new(Arc::new(FailingClient), 10);
        let token = CancellationToken::new();

        let ok = cache
            .allowed(&token, &url("https://example.com/anything"), "antbot")
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_empty_agent_defaults_to_wildcard() {
        let server = RobotsServer::new(200, "User-agent: *\nDisallow: /private/");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        let denied = cache
            .allowed(&token, &url("https://example.com/private/x"), "")
            .await
            .unwrap();
        assert!(!denied);
    }

    #[tokio::test]
    async fn test_wait_without_delay_returns_immediately() {
        let server = RobotsServer::new(200, "User-agent: *\nDisallow:");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        cache
            .wait(&token, &url("https://example.com/"), "antbot")
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_crawl_delay() {
        let server = RobotsServer::new(200, "User-agent: *\nCrawl-delay: 2");
        let cache = RobotsCache::new(server.clone(), 10);
        let token = CancellationToken::new();

        let before = tokio::time::Instant::now();
        cache
            .wait(&token, &url("https://example.com/"), "antbot")
            .await
            .unwrap();

        assert!(before.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_cancelled_mid_sleep() {
        let server = RobotsServer::new(200, "User-agent: *\nCrawl-delay: 60");
        let cache = Arc::new(RobotsCache::new(server.clone(), 10));
        let token = CancellationToken::new();

        let waiter = {
            let cache = Arc::clone(&cache);
            let token = token.clone();
            tokio::spawn(async move {
                cache.wait(&token, &url("https://example.com/"), "antbot").await
            })
        };

        tokio::task::yield_now().await;
        token.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
