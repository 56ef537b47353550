//! URL admission matchers.
//!
//! A matcher decides whether a URL may enter the crawl frontier. The engine
//! consults the configured matcher after normalization and before
//! deduplication; a rejected URL is silently discarded.

use regex::Regex;
use url::Url;

/// A URL admission predicate.
///
/// Matchers are called concurrently from every worker, implementations must
/// be cheap and must not block.
pub trait Matcher: Send + Sync {
    /// Returns true if the URL should be admitted.
    fn matches(&self, url: &Url) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&Url) -> bool + Send + Sync,
{
    fn matches(&self, url: &Url) -> bool {
        self(url)
    }
}

/// Returns a matcher that admits URLs whose `host[:port]` equals `host`.
///
/// The comparison is exact, `example.com` does not admit
/// `blog.example.com`.
///
/// # Examples
///
/// ```
/// use skitter::{match_hostname, Matcher};
/// use url::Url;
///
/// let matcher = match_hostname("example.com");
/// assert!(matcher.matches(&Url::parse("https://example.com/a").unwrap()));
/// assert!(!matcher.matches(&Url::parse("https://example.org/a").unwrap()));
/// ```
pub fn match_hostname(host: impl Into<String>) -> impl Matcher {
    let host = host.into();
    move |url: &Url| {
        let candidate = url.host_str().unwrap_or_default();
        match (url.port(), host.split_once(':')) {
            (Some(port), Some((h, p))) => candidate == h && p.parse() == Ok(port),
            (None, None) => candidate == host,
            _ => false,
        }
    }
}

/// Returns a matcher that admits URLs matching a shell-style pattern.
///
/// The pattern supports `*` (any run of characters) and `?` (any single
/// character) and is applied to the `host[:port]/path` form of the URL,
/// the scheme and the query string are not part of the match.
pub fn match_pattern(pattern: impl Into<String>) -> impl Matcher {
    let pattern = pattern.into();
    move |url: &Url| wildcard_match(&pattern, &super::host_path(url))
}

/// Returns a matcher that admits URLs matching a regular expression.
///
/// The expression is applied to the `host[:port]/path` form of the URL.
///
/// # Panics
///
/// Panics when the expression is invalid, an invalid pattern is a
/// programmer error.
pub fn match_regex(expr: &str) -> impl Matcher {
    let re = Regex::new(expr).unwrap_or_else(|err| panic!("regex {:?}: {}", expr, err));
    move |url: &Url| re.is_match(&super::host_path(url))
}

/// Matches `text` against a shell-style wildcard `pattern`.
///
/// `*` matches any run of characters including the empty run, `?` matches
/// exactly one character. The whole text must match.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            // Backtrack, let the star consume one more character.
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}
