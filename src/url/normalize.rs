//! URL normalization.
//!
//! Two URL strings that denote the same resource must collapse to the same
//! canonical string so that the deduper can guarantee at-most-once visits.
//!
//! <https://en.wikipedia.org/wiki/URI_normalization>

use crate::Error;
use url::Url;

/// Normalizes the given raw URL.
///
/// The following rules are applied, in order:
///
/// 1. Lowercase the scheme and the hostname.
/// 2. Remove the default port (`:80` for http, `:443` for https).
/// 3. Uppercase percent-encoded triplets (`%2a` becomes `%2A`).
/// 4. Decode percent-encoded triplets of unreserved characters
///    (`%7E` becomes `~`).
/// 5. Remove dot segments from the path.
/// 6. Convert an empty path to `/`.
/// 7. Sort query parameters lexicographically by their raw `key=value`
///    token and remove a lone `?`.
/// 8. Remove the fragment.
///
/// The function fails only when the input cannot be parsed as a URL;
/// normalization itself always succeeds and is idempotent:
/// `normalize(normalize(u)) == normalize(u)`.
///
/// # Examples
///
/// ```
/// use skitter::normalize;
///
/// let url = normalize("HTTP://Example.COM:80/a/../b?z=1&a=2#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b?a=2&z=1");
/// ```
pub fn normalize(rawurl: &str) -> Result<Url, Error> {
    // The parser already lowercases the scheme and host, strips default
    // ports and removes dot segments.
    let mut url = Url::parse(rawurl).map_err(|_| Error::InvalidUrl {
        url: rawurl.to_string(),
    })?;

    let path = percent_normalize(url.path());
    url.set_path(&path);

    match url.query() {
        Some("") => url.set_query(None),
        Some(query) => {
            let sorted = sort_query(query);
            url.set_query(Some(&sorted));
        }
        None => {}
    }

    url.set_fragment(None);

    Ok(url)
}

/// Normalizes percent-encoded triplets in a path.
///
/// Triplets encoding unreserved characters are decoded, all other triplets
/// have their hex digits uppercased. Anything that is not a valid triplet
/// is copied through untouched.
fn percent_normalize(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(value) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                if is_unreserved(value) {
                    out.push(value as char);
                } else {
                    out.push('%');
                    out.push(bytes[i + 1].to_ascii_uppercase() as char);
                    out.push(bytes[i + 2].to_ascii_uppercase() as char);
                }
                i += 3;
                continue;
            }
        }
        // Paths produced by the URL parser are ASCII-safe, but copy byte by
        // byte so multi-byte sequences survive as-is.
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&path[i..i + ch_len]);
        i += ch_len;
    }

    out
}

/// Sorts the raw query tokens.
fn sort_query(query: &str) -> String {
    let mut parts: Vec<&str> = query.split('&').collect();
    parts.sort_unstable();
    parts.join("&")
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Unreserved characters per RFC 3986 section 2.3.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(input: &str, expect: &str) {
        let url = normalize(input).unwrap();
        assert_eq!(url.as_str(), expect, "normalize({:?})", input);
    }

    #[test]
    fn test_uppercase_percent_triplets() {
        check("http://example.com/foo%2a", "http://example.com/foo%2A");
    }

    #[test]
    fn test_lowercase_scheme_and_host() {
        check("HTTP://User@Example.COM/Foo", "http://User@example.com/Foo");
    }

    #[test]
    fn test_decode_unreserved_triplets() {
        check("http://example.com/%7Efoo", "http://example.com/~foo");
    }

    #[test]
    fn test_remove_dot_segments() {
        check(
            "http://example.com/foo/./bar/baz/../qux",
            "http://example.com/foo/bar/qux",
        );
    }

    #[test]
    fn test_empty_path_becomes_root() {
        check("http://example.com", "http://example.com/");
    }

    #[test]
    fn test_remove_default_http_port() {
        check("http://example.com:80/", "http://example.com/");
    }

    #[test]
    fn test_remove_default_https_port() {
        check("https://example.com:443/", "https://example.com/");
    }

    #[test]
    fn test_remove_empty_query() {
        check("http://example.com/?", "http://example.com/");
    }

    #[test]
    fn test_sort_query_parameters() {
        check(
            "http://example.com/?a=1&c=3&b=2",
            "http://example.com/?a=1&b=2&c=3",
        );
    }

    #[test]
    fn test_remove_fragment() {
        check("http://example.com/#foo", "http://example.com/");
    }

    #[test]
    fn test_keeps_non_default_port() {
        check("http://example.com:8080/", "http://example.com:8080/");
    }

    #[test]
    fn test_keeps_reserved_triplets() {
        check("http://example.com/a%2Fb", "http://example.com/a%2Fb");
    }

    #[test]
    fn test_invalid_url() {
        assert!(normalize("foo").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "http://example.com/foo%2a",
            "HTTP://User@Example.COM/Foo",
            "http://example.com/%7Efoo",
            "http://example.com/foo/./bar/baz/../qux",
            "http://example.com",
            "http://example.com:80/",
            "https://example.com:443/",
            "http://example.com/?",
            "http://example.com/?a=1&c=3&b=2",
            "http://example.com/#foo",
        ];

        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "normalize is not idempotent for {:?}", input);
        }
    }
}
