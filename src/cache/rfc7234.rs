//! The RFC 7234 cache strategy.
//!
//! <https://tools.ietf.org/html/rfc7234>

use chrono::{Duration, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};

use super::directives::{date, directives_from, expires, nostore};
use super::{vary_matches, Freshness, Strategy};
use crate::fetch::{Request, Response};

/// The default, standards-following strategy.
///
/// Requests carrying `Authorization`, `Range` or `Content-Range` headers
/// are never cached.
#[derive(Debug, Default)]
pub(crate) struct Rfc7234;

/// Statuses a cache is allowed to retain.
///
/// <https://tools.ietf.org/html/rfc7234#section-3>
pub(crate) fn storable_status(status: u16) -> bool {
    matches!(
        status,
        200 | 203 | 204 | 206 | 300 | 301 | 404 | 405 | 410 | 414 | 501
    )
}

impl Strategy for Rfc7234 {
    fn cacheable(&self, req: &Request) -> bool {
        if req.method != "GET" && req.method != "HEAD" {
            return false;
        }

        if req.headers.contains_key(AUTHORIZATION)
            || req.headers.contains_key(RANGE)
            || req.headers.contains_key(CONTENT_RANGE)
        {
            return false;
        }

        !nostore(&req.headers)
    }

    /// <https://tools.ietf.org/html/rfc7234#section-3>
    fn storable(&self, req: &Request, resp: &Response) -> bool {
        if !self.cacheable(req) {
            return false;
        }

        if !storable_status(resp.status.as_u16()) {
            return false;
        }

        if nostore(&resp.headers) {
            return false;
        }

        // The response must carry a date and an explicit lifetime, either
        // a positive max-age or an expiry after the date.
        let Some(date) = date(&resp.headers) else {
            return false;
        };

        if let Some(maxage) = directives_from(&resp.headers).duration("max-age") {
            return maxage > Duration::zero();
        }

        if let Some(expires) = expires(&resp.headers) {
            return expires > date;
        }

        false
    }

    /// <https://tools.ietf.org/html/rfc7234#section-4>
    fn freshness(&self, req: &Request, stored: &Response) -> Freshness {
        // Selecting header fields nominated by the Vary header must match
        // the presented request.
        if !vary_matches(req, stored) {
            return Freshness::Transparent;
        }

        let reqd = directives_from(&req.headers);
        let resd = directives_from(&stored.headers);

        // A no-cache directive on either side forces validation.
        if reqd.has("no-cache") || resd.has("no-cache") {
            return Freshness::Stale;
        }

        if reqd.has("only-if-cached") {
            return Freshness::Fresh;
        }

        if let Some(date) = date(&stored.headers) {
            let mut age = Utc::now() - date;
            let mut lifetime = Duration::zero();

            if let Some(maxage) = resd.duration("max-age") {
                lifetime = maxage;
            } else if let Some(expires) = expires(&stored.headers) {
                lifetime = expires - date;
            }

            // A request max-age overrides the response lifetime.
            if let Some(maxage) = reqd.duration("max-age") {
                lifetime = maxage;
            }

            if let Some(minfresh) = reqd.duration("min-fresh") {
                age = age + minfresh;
            }

            if reqd.has("max-stale") {
                match reqd.duration("max-stale") {
                    Some(maxstale) => age = age - maxstale,
                    None => return Freshness::Fresh,
                }
            }

            if lifetime > age {
                return Freshness::Fresh;
            }
        }

        Freshness::Stale
    }
}
