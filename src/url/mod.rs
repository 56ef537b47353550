//! URL handling: canonical normalization and admission matchers.

mod matcher;
mod normalize;

pub use matcher::{match_hostname, match_pattern, match_regex, wildcard_match, Matcher};
pub use normalize::normalize;

use url::Url;

/// Returns the `host[:port]` authority of a URL.
///
/// The port is included only when it is present in the URL, which for
/// http/https means only when it is non-default.
pub(crate) fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Returns the `host[:port]/path` form matchers and limiters operate on.
///
/// The scheme and the query string are excluded on purpose, patterns are
/// meant to select resources, not transports.
pub(crate) fn host_path(url: &Url) -> String {
    let mut ret = host_key(url);
    ret.push_str(url.path());
    ret
}
