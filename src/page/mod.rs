//! A fetched page and its extraction surface.
//!
//! A [`Page`] wraps a buffered response body and parses it into a DOM on
//! first use; the parse happens at most once and its result is memoized.
//! The DOM handle is single-threaded, so a page is meant to be consumed by
//! the worker that created it and dropped before the next await point.

pub(crate) mod selectors;

use std::cell::RefCell;

use bytes::Bytes;
use once_cell::unsync::OnceCell;
use scraper::{ElementRef, Html};
use url::Url;

use crate::fetch::{HeaderMap, Response};
use crate::scan::{self, Scannable, ScanError};

/// A fetched page.
pub struct Page {
    url: Url,
    headers: HeaderMap,
    body: RefCell<Option<Bytes>>,
    dom: OnceCell<Html>,
}

impl Page {
    /// Creates a page from its parts.
    pub fn new(url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            headers,
            body: RefCell::new(Some(body)),
            dom: OnceCell::new(),
        }
    }

    /// Creates a page from a fetched response.
    ///
    /// The page URL is the response's final URL, redirects included, so
    /// relative links resolve against the address that actually served the
    /// document.
    pub fn from_response(resp: Response) -> Self {
        Self::new(resp.url, resp.headers, resp.body)
    }

    /// Returns the page URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Parses the body into a DOM, at most once.
    fn dom(&self) -> &Html {
        self.dom.get_or_init(|| {
            let body = self.body.borrow_mut().take().unwrap_or_default();
            Html::parse_document(&String::from_utf8_lossy(&body))
        })
    }

    /// Returns all nodes matching the selector.
    ///
    /// An invalid selector yields no nodes.
    pub fn query(&self, selector: &str) -> Vec<ElementRef<'_>> {
        match selectors::compile(selector) {
            Some(sel) => self.dom().select(&sel).collect(),
            None => Vec::new(),
        }
    }

    /// Returns the inner text of the first node matching the selector.
    ///
    /// Returns an empty string when nothing matches.
    pub fn text(&self, selector: &str) -> String {
        self.query(selector)
            .first()
            .map(|el| el.text().collect())
            .unwrap_or_default()
    }

    /// Returns an attribute of the first node matching the selector.
    pub fn attr(&self, selector: &str, name: &str) -> Option<String> {
        self.query(selector)
            .first()
            .and_then(|el| el.value().attr(name))
            .map(str::to_string)
    }

    /// Scans the page into `T` using its compiled extraction plan.
    pub fn scan<T: Scannable>(&self) -> Result<T, ScanError> {
        scan::scan(self.dom().root_element())
    }

    /// Returns all URLs on the page.
    ///
    /// Anchors are resolved against the page URL; anything that does not
    /// resolve to an http or https URL is skipped. Document order is
    /// preserved.
    pub fn urls(&self) -> Vec<Url> {
        self.resolve("a[href]")
    }

    /// Returns the URLs of anchors matching the selector.
    pub fn next(&self, selector: &str) -> Vec<Url> {
        self.resolve(selector)
    }

    fn resolve(&self, selector: &str) -> Vec<Url> {
        self.query(selector)
            .into_iter()
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| self.url.join(href).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .collect()
    }
}
