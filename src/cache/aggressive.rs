//! The aggressive cache strategy.

use chrono::Utc;
use std::time::Duration;

use super::directives::date;
use super::rfc7234::{storable_status, Rfc7234};
use super::{Freshness, Strategy};
use crate::fetch::{Request, Response};

/// A strategy that caches everything it may, for a fixed age.
///
/// Many sites never implement caching headers properly, so this strategy
/// ignores the response's directives entirely: any response to a cacheable
/// request with a storable status and a `Date` header is stored, and it is
/// served from the cache until it is older than the configured age.
///
/// Which requests are cacheable follows the RFC rules, so `no-store`,
/// `Authorization` and ranged requests still bypass the cache.
#[derive(Debug)]
pub(crate) struct Aggressive {
    age: Duration,
}

const DEFAULT_AGE: Duration = Duration::from_secs(24 * 60 * 60);

impl Aggressive {
    /// Returns a strategy serving responses up to `age` old.
    ///
    /// A zero age falls back to the default of 24 hours.
    pub(crate) fn new(age: Duration) -> Self {
        Self {
            age: if age.is_zero() { DEFAULT_AGE } else { age },
        }
    }
}

impl Strategy for Aggressive {
    fn cacheable(&self, req: &Request) -> bool {
        Rfc7234.cacheable(req)
    }

    fn storable(&self, req: &Request, resp: &Response) -> bool {
        if req.method != "GET" && req.method != "HEAD" {
            return false;
        }

        if !storable_status(resp.status.as_u16()) {
            return false;
        }

        date(&resp.headers).is_some()
    }

    fn freshness(&self, _req: &Request, stored: &Response) -> Freshness {
        if let Some(date) = date(&stored.headers) {
            let age = Utc::now() - date;
            if age < chrono::Duration::from_std(self.age).unwrap_or_else(|_| chrono::Duration::max_value()) {
                return Freshness::Fresh;
            }
        }

        Freshness::Transparent
    }
}
