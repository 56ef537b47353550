//! Cache-Control directives and caching-related header fields.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, CACHE_CONTROL, DATE, EXPIRES};

/// Parsed `Cache-Control` directives.
///
/// Names and values are lowercased; a directive without a value maps to an
/// empty string.
#[derive(Debug, Default)]
pub(crate) struct Directives(HashMap<String, String>);

/// Parses the directives of every `Cache-Control` header in `headers`.
pub(crate) fn directives_from(headers: &HeaderMap) -> Directives {
    let mut map = HashMap::new();

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else { continue };

        for item in split(value) {
            match item.find('=') {
                Some(j) => {
                    let value = item[j + 1..].to_string();
                    let mut name = item;
                    name.truncate(j);
                    map.insert(name, value);
                }
                None => {
                    map.insert(item, String::new());
                }
            }
        }
    }

    Directives(map)
}

impl Directives {
    /// Returns true if the directive is set.
    pub(crate) fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Parses a directive's value as a duration in seconds.
    pub(crate) fn duration(&self, name: &str) -> Option<Duration> {
        let value = self.0.get(name)?;
        let seconds: i64 = value.parse().ok()?;
        Some(Duration::seconds(seconds))
    }
}

/// Returns true if the `no-store` directive is set.
pub(crate) fn nostore(headers: &HeaderMap) -> bool {
    directives_from(headers).has("no-store")
}

/// Returns the parsed `Date` header.
pub(crate) fn date(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    httpdate(headers.get(DATE)?.to_str().ok()?)
}

/// Returns the parsed `Expires` header.
pub(crate) fn expires(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    httpdate(headers.get(EXPIRES)?.to_str().ok()?)
}

/// Parses an RFC 1123 HTTP date.
pub(crate) fn httpdate(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Splits a comma separated header value, trimming and lowercasing each
/// item and dropping empty ones.
pub(crate) fn split(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
}
