//! The process-wide selector cache.
//!
//! Selector strings show up over and over, every page queries `a[href]`,
//! so compiled selectors are cached globally for the life of the process.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use scraper::Selector;

static SELECTORS: Lazy<RwLock<HashMap<String, Option<Selector>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compiles a selector through the cache.
///
/// Invalid selectors are cached as `None` so they are not re-parsed on
/// every use.
pub(crate) fn compile(selector: &str) -> Option<Selector> {
    if let Some(cached) = SELECTORS.read().get(selector) {
        return cached.clone();
    }

    let compiled = Selector::parse(selector).ok();

    SELECTORS
        .write()
        .insert(selector.to_string(), compiled.clone());

    compiled
}
