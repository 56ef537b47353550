//! Page fetching.
//!
//! The fetcher turns URLs into responses through the configured [`Client`],
//! classifying failures and retrying the temporary ones with quadratic
//! backoff. Dead links (404) are not errors, they yield no response and the
//! engine silently drops the URL.

mod client;

pub use client::{
    Client, ClientError, HeaderMap, HeaderName, HeaderValue, HttpClient, Method, Request,
    Response, StatusCode,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// The default user agent for page and robots.txt requests.
pub const DEFAULT_USER_AGENT: &str = "antbot";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Fetch errors.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin answered with an error status.
    #[error("fetch {url}: {status}")]
    Status { url: Url, status: StatusCode },

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The retry budget was exhausted; the source is the last error.
    #[error("max attempts of {attempts} reached: {source}")]
    MaxAttempts {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },

    #[error("fetch cancelled")]
    Cancelled,

    /// Min backoff must be strictly less than max backoff.
    #[error("min backoff must be less than max backoff")]
    InvalidBackoff,
}

impl FetchError {
    /// Returns true if the fetch may succeed when retried.
    ///
    /// 503 (service unavailable), 504 (gateway timeout) and 429 (too many
    /// requests) are temporary, as are transport-level timeouts and
    /// connection failures.
    pub fn is_temporary(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                matches!(status.as_u16(), 503 | 504 | 429)
            }
            FetchError::Client(err) => err.is_temporary(),
            _ => false,
        }
    }
}

/// A page fetcher.
///
/// Implementations turn a URL into a buffered response, `Ok(None)` means
/// the URL is a dead link that should be skipped without an error.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        token: &CancellationToken,
        url: &Url,
    ) -> Result<Option<Response>, FetchError>;
}

/// The default HTTP fetcher.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn Client>,
    user_agent: String,
    max_attempts: u32,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl Fetcher {
    /// Returns a fetcher with the default retry policy.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Overrides the user agent sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Overrides the maximum number of request attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Overrides the backoff floor and ceiling.
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    /// Performs a single attempt without retries.
    async fn attempt(
        &self,
        token: &CancellationToken,
        url: &Url,
    ) -> Result<Response, FetchError> {
        let mut req = Request::get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/html; charset=UTF-8"));

        if let Ok(agent) = HeaderValue::from_str(&self.user_agent) {
            req = req.header(USER_AGENT, agent);
        }

        let resp = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            resp = self.client.perform(req) => resp?,
        };

        if resp.status.as_u16() >= 400 {
            return Err(FetchError::Status {
                url: resp.url.clone(),
                status: resp.status,
            });
        }

        Ok(resp)
    }

    /// Sleeps before the next attempt.
    ///
    /// The delay grows quadratically with the attempt number,
    /// `min(max_backoff, attempt² · min_backoff)`.
    async fn backoff_sleep(
        &self,
        token: &CancellationToken,
        attempt: u32,
    ) -> Result<(), FetchError> {
        let delay = self
            .min_backoff
            .saturating_mul(attempt.saturating_mul(attempt))
            .min(self.max_backoff);

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[async_trait]
impl Fetch for Fetcher {
    async fn fetch(
        &self,
        token: &CancellationToken,
        url: &Url,
    ) -> Result<Option<Response>, FetchError> {
        if self.min_backoff >= self.max_backoff {
            return Err(FetchError::InvalidBackoff);
        }

        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.attempt(token, url).await {
                Ok(resp) => return Ok(Some(resp)),
                Err(err) => err,
            };

            if let FetchError::Status { status, .. } = &err {
                if status.as_u16() == 404 {
                    return Ok(None);
                }
            }

            if !err.is_temporary() {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                return Err(FetchError::MaxAttempts {
                    attempts: self.max_attempts,
                    source: Box::new(err),
                });
            }

            tracing::debug!(%url, attempt, error = %err, "retrying fetch");
            self.backoff_sleep(token, attempt).await?;
        }
    }
}
