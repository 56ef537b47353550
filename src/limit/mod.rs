//! Request rate limiting.
//!
//! Limiters gate the engine just before a request is made. Each limiter is a
//! token bucket that refills at `n` tokens per second with a capacity of `n`;
//! acquiring waits until a token is available or the operation is cancelled.
//!
//! Multiple limiters compose: the engine runs every configured limiter in
//! order and a URL proceeds only once all of them have admitted it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Error;

/// Controls how many requests the engine is allowed to make.
///
/// Limiters are shared across workers and must be safe for concurrent
/// callers.
#[async_trait]
pub trait Limit: Send + Sync {
    /// Blocks until a request to `url` is allowed to happen.
    ///
    /// Returns [`Error::Cancelled`] when the token is cancelled while
    /// waiting.
    async fn limit(&self, token: &CancellationToken, url: &Url) -> Result<(), Error>;
}

/// A token-bucket rate limiter scoped to a subset of URLs.
#[derive(Debug)]
pub struct Limiter {
    bucket: Bucket,
    scope: Scope,
}

#[derive(Debug)]
enum Scope {
    Global,
    Hostname(String),
    Pattern(String),
    Regex(Regex),
}

impl Limiter {
    /// Returns a limiter that allows `n` requests per second for all URLs.
    pub fn global(n: u32) -> Self {
        Self {
            bucket: Bucket::new(n),
            scope: Scope::Global,
        }
    }

    /// Returns a limiter that allows `n` requests per second for the given
    /// `host[:port]`.
    pub fn hostname(n: u32, host: impl Into<String>) -> Self {
        Self {
            bucket: Bucket::new(n),
            scope: Scope::Hostname(host.into()),
        }
    }

    /// Returns a limiter that allows `n` requests per second for URLs whose
    /// `host[:port]/path` matches a shell-style pattern.
    pub fn pattern(n: u32, pattern: impl Into<String>) -> Self {
        Self {
            bucket: Bucket::new(n),
            scope: Scope::Pattern(pattern.into()),
        }
    }

    /// Returns a limiter that allows `n` requests per second for URLs whose
    /// `host[:port]/path` matches a regular expression.
    ///
    /// # Panics
    ///
    /// Panics when the expression is invalid.
    pub fn regex(n: u32, expr: &str) -> Self {
        let re = Regex::new(expr).unwrap_or_else(|err| panic!("regex {:?}: {}", expr, err));
        Self {
            bucket: Bucket::new(n),
            scope: Scope::Regex(re),
        }
    }

    fn applies(&self, url: &Url) -> bool {
        match &self.scope {
            Scope::Global => true,
            Scope::Hostname(host) => crate::url::host_key(url) == *host,
            Scope::Pattern(pattern) => {
                crate::url::wildcard_match(pattern, &crate::url::host_path(url))
            }
            Scope::Regex(re) => re.is_match(&crate::url::host_path(url)),
        }
    }
}

#[async_trait]
impl Limit for Limiter {
    async fn limit(&self, token: &CancellationToken, url: &Url) -> Result<(), Error> {
        if self.applies(url) {
            self.bucket.acquire(token).await?;
        }
        Ok(())
    }
}

/// A token bucket with capacity equal to its refill rate.
#[derive(Debug)]
struct Bucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn new(n: u32) -> Self {
        let n = n.max(1) as f64;
        Self {
            rate: n,
            capacity: n,
            state: Mutex::new(BucketState {
                tokens: n,
                updated: Instant::now(),
            }),
        }
    }

    /// Takes one token, sleeping until one is available.
    async fn acquire(&self, token: &CancellationToken) -> Result<(), Error> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.updated).as_secs_f64();

                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.updated = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_global_admits_within_capacity() {
        let limiter = Limiter::global(10);
        let token = CancellationToken::new();

        for _ in 0..10 {
            limiter.limit(&token, &url("https://a.com/")).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_when_bucket_is_empty() {
        let limiter = Limiter::global(1);
        let token = CancellationToken::new();
        let target = url("https://a.com/");

        limiter.limit(&token, &target).await.unwrap();

        let before = tokio::time::Instant::now();
        limiter.limit(&token, &target).await.unwrap();

        // The paused clock auto-advances through the sleep.
        assert!(before.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let limiter = Limiter::global(1);
        let token = CancellationToken::new();
        let target = url("https://a.com/");

        limiter.limit(&token, &target).await.unwrap();
        token.cancel();

        let err = limiter.limit(&token, &target).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_hostname_scope() {
        let limiter = Limiter::hostname(1, "a.com");
        let token = CancellationToken::new();

        limiter.limit(&token, &url("https://a.com/")).await.unwrap();

        // Other hosts bypass the bucket entirely.
        for _ in 0..10 {
            limiter.limit(&token, &url("https://b.com/")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_pattern_scope() {
        let limiter = Limiter::pattern(1, "a.com/docs/*");
        let token = CancellationToken::new();

        limiter
            .limit(&token, &url("https://a.com/docs/intro"))
            .await
            .unwrap();

        for _ in 0..10 {
            limiter.limit(&token, &url("https://a.com/blog")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_regex_scope() {
        let limiter = Limiter::regex(1, r"a\.com/\d+");
        let token = CancellationToken::new();

        limiter.limit(&token, &url("https://a.com/42")).await.unwrap();

        for _ in 0..10 {
            limiter.limit(&token, &url("https://a.com/about")).await.unwrap();
        }
    }

    #[test]
    #[should_panic]
    fn test_regex_invalid_panics() {
        Limiter::regex(1, "(");
    }
}
