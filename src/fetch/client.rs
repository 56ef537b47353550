//! The HTTP client abstraction.
//!
//! The engine performs every request, page fetches, robots.txt lookups and
//! cache validations, through the [`Client`] trait so that transports can be
//! swapped out. [`HttpClient`] is the default reqwest-backed implementation;
//! the HTTP cache wraps any client with the same trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};

/// An HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl Request {
    /// Returns a GET request for the URL with no headers.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// An HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    /// The final URL after client-managed redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A transport-level error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{method} {url}: {message}")]
    Transport {
        method: Method,
        url: Url,
        message: String,
        temporary: bool,
    },
}

impl ClientError {
    /// Returns true if retrying the request may succeed, connection
    /// failures and timeouts are temporary.
    pub fn is_temporary(&self) -> bool {
        match self {
            ClientError::Transport { temporary, .. } => *temporary,
        }
    }
}

/// An HTTP client.
///
/// A client is responsible for connection management, redirects and
/// transport policy. It must be safe for concurrent calls.
#[async_trait]
pub trait Client: Send + Sync {
    /// Performs the request and returns the buffered response.
    ///
    /// A non-2xx status does not produce an error, classification is the
    /// caller's concern.
    async fn perform(&self, req: Request) -> Result<Response, ClientError>;
}

/// The default reqwest-backed client.
///
/// Configured with a 10 second request timeout; redirects are followed by
/// the underlying client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { inner }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn perform(&self, req: Request) -> Result<Response, ClientError> {
        let method = req.method.clone();
        let url = req.url.clone();

        let transport = |source: reqwest::Error| ClientError::Transport {
            method: method.clone(),
            url: url.clone(),
            message: source.to_string(),
            temporary: source.is_timeout() || source.is_connect(),
        };

        let resp = self
            .inner
            .request(req.method, req.url.clone())
            .headers(req.headers)
            .send()
            .await
            .map_err(transport)?;

        let final_url = resp.url().clone();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(transport)?;

        Ok(Response {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}
