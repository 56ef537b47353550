//! Stored response framing.
//!
//! Responses are persisted as an HTTP/1.1-style dump: a status line, the
//! header block, a blank line and the raw body. The format round-trips
//! every field freshness and validation look at and is stable within a
//! store instance.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::fetch::Response;

#[derive(Debug, Error)]
pub(crate) enum WireError {
    #[error("malformed stored response")]
    Malformed,

    #[error("malformed status line {0:?}")]
    StatusLine(String),

    #[error("malformed header line {0:?}")]
    HeaderLine(String),
}

/// Serializes a response, headers and body included.
pub(crate) fn dump(resp: &Response) -> Bytes {
    let mut out = Vec::with_capacity(resp.body.len() + 256);

    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(resp.status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(resp.status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in resp.headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);

    Bytes::from(out)
}

/// Re-parses a dumped response.
///
/// The URL is not part of the dump, the caller supplies it from the live
/// request.
pub(crate) fn parse(data: Bytes, url: Url) -> Result<Response, WireError> {
    let head_len = find_blank_line(&data).ok_or(WireError::Malformed)?;
    let head = std::str::from_utf8(&data[..head_len]).map_err(|_| WireError::Malformed)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().ok_or(WireError::Malformed)?;
    let status = parse_status_line(status_line)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::HeaderLine(line.to_string()))?;

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| WireError::HeaderLine(line.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| WireError::HeaderLine(line.to_string()))?;

        headers.append(name, value);
    }

    let body = data.slice(head_len + 4..);

    Ok(Response {
        url,
        status,
        headers,
        body,
    })
}

/// Returns the length of the head block, excluding the blank line.
fn find_blank_line(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<StatusCode, WireError> {
    let mut parts = line.splitn(3, ' ');
    let _proto = parts.next();

    let code = parts
        .next()
        .ok_or_else(|| WireError::StatusLine(line.to_string()))?;

    code.parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| WireError::StatusLine(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{CACHE_CONTROL, DATE, ETAG};

    fn response() -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=120"));
        headers.insert(ETAG, HeaderValue::from_static("\"etag\""));

        Response {
            url: Url::parse("https://example.com/").unwrap(),
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"<html></html>"),
        }
    }

    #[test]
    fn test_round_trip() {
        let resp = response();
        let parsed = parse(dump(&resp), resp.url.clone()).unwrap();

        assert_eq!(parsed.status, resp.status);
        assert_eq!(parsed.body, resp.body);
        assert_eq!(parsed.headers.get(DATE), resp.headers.get(DATE));
        assert_eq!(parsed.headers.get(CACHE_CONTROL), resp.headers.get(CACHE_CONTROL));
        assert_eq!(parsed.headers.get(ETAG), resp.headers.get(ETAG));
    }

    #[test]
    fn test_round_trip_empty_body() {
        let mut resp = response();
        resp.body = Bytes::new();

        let parsed = parse(dump(&resp), resp.url.clone()).unwrap();
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_round_trip_multi_value_headers() {
        let mut resp = response();
        resp.headers
            .append(CACHE_CONTROL, HeaderValue::from_static("no-transform"));

        let parsed = parse(dump(&resp), resp.url.clone()).unwrap();
        let values: Vec<_> = parsed.headers.get_all(CACHE_CONTROL).iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_round_trip_body_with_blank_lines() {
        let mut resp = response();
        resp.body = Bytes::from_static(b"line one\r\n\r\nline two");

        let parsed = parse(dump(&resp), resp.url.clone()).unwrap();
        assert_eq!(parsed.body, resp.body);
    }

    #[test]
    fn test_parse_malformed() {
        let url = Url::parse("https://example.com/").unwrap();

        assert!(parse(Bytes::from_static(b"garbage"), url.clone()).is_err());
        assert!(parse(Bytes::from_static(b"HTTP/1.1 abc\r\n\r\n"), url).is_err());
    }

    #[test]
    fn test_parse_status() {
        let url = Url::parse("https://example.com/").unwrap();
        let parsed = parse(Bytes::from_static(b"HTTP/1.1 304 Not Modified\r\n\r\n"), url).unwrap();
        assert_eq!(parsed.status, StatusCode::NOT_MODIFIED);
    }
}
