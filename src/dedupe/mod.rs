//! URL de-duplication.
//!
//! The engine normalizes URLs before handing them to a deduper, so two
//! spellings of the same resource arrive as one canonical string. A deduper
//! answers "have we seen this URL?" and records the ones it has not.

use dashmap::DashSet;
use parking_lot::Mutex;
use url::Url;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// A URL de-duplicator.
///
/// Dedupers are shared across workers and must be safe for concurrent
/// callers.
pub trait Deduper: Send + Sync {
    /// Returns the subset of `urls` that has not been observed yet and
    /// records them as observed.
    ///
    /// Each URL is tested and marked atomically, two concurrent calls with
    /// the same URL hand it out at most once.
    fn dedupe(&self, urls: Vec<Url>) -> Vec<Url>;
}

/// An exact in-memory deduper.
///
/// The deduper keeps every observed URL string in memory and never yields
/// false positives. For large crawls where memory matters, use
/// [`DedupeBloom`] instead.
#[derive(Debug, Default)]
pub struct DedupeMap {
    seen: DashSet<String>,
}

impl DedupeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of observed URLs.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Deduper for DedupeMap {
    fn dedupe(&self, urls: Vec<Url>) -> Vec<Url> {
        urls.into_iter()
            .filter(|url| self.seen.insert(url.as_str().to_string()))
            .collect()
    }
}

/// A bloom filter deduper.
///
/// The filter uses `k` hash functions over `m` bits and holds no URL data,
/// its memory use is fixed at `m / 8` bytes. In exchange it may produce
/// false positives, a legitimate URL can be skipped as already seen. URLs
/// are never forgotten, there is no deletion.
#[derive(Debug)]
pub struct DedupeBloom {
    bits: Mutex<Vec<u8>>,
    num_bits: u64,
    num_hashes: u32,
}

impl DedupeBloom {
    /// Creates a bloom deduper with `k` hash functions and `m` bits.
    pub fn new(k: u32, m: u64) -> Self {
        let num_bits = m.max(8);
        let num_bytes = (num_bits as usize + 7) / 8;

        Self {
            bits: Mutex::new(vec![0u8; num_bytes]),
            num_bits,
            num_hashes: k.max(1),
        }
    }

    /// Tests and marks a single URL, returns true when it was new.
    ///
    /// A URL is new iff any of its bit positions was unset; all of its bits
    /// are set before returning.
    fn observe(&self, url: &Url) -> bool {
        let item = url.as_str().as_bytes();
        let mut bits = self.bits.lock();
        let mut new = false;

        for seed in 0..self.num_hashes {
            let hash = xxh3_64_with_seed(item, seed as u64);
            let bit_idx = (hash % self.num_bits) as usize;
            let byte_idx = bit_idx / 8;
            let mask = 1u8 << (bit_idx % 8);

            if bits[byte_idx] & mask == 0 {
                new = true;
                bits[byte_idx] |= mask;
            }
        }

        new
    }
}

impl Deduper for DedupeBloom {
    fn dedupe(&self, urls: Vec<Url>) -> Vec<Url> {
        urls.into_iter().filter(|url| self.observe(url)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<Url> {
        raw.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn test_map_dedupes() {
        let deduper = DedupeMap::new();

        let first = deduper.dedupe(urls(&["https://a.com/", "https://b.com/"]));
        assert_eq!(first.len(), 2);

        let second = deduper.dedupe(urls(&["https://a.com/", "https://c.com/"]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_str(), "https://c.com/");
    }

    #[test]
    fn test_map_dedupes_within_batch() {
        let deduper = DedupeMap::new();

        let ret = deduper.dedupe(urls(&["https://a.com/", "https://a.com/"]));
        assert_eq!(ret.len(), 1);
    }

    #[test]
    fn test_map_concurrent() {
        use std::sync::Arc;

        let deduper = Arc::new(DedupeMap::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let deduper = Arc::clone(&deduper);
            handles.push(std::thread::spawn(move || {
                deduper.dedupe(urls(&["https://a.com/", "https://b.com/"])).len()
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Each URL is handed out exactly once across all threads.
        assert_eq!(total, 2);
    }

    #[test]
    fn test_bloom_dedupes() {
        let deduper = DedupeBloom::new(4, 1 << 16);

        let first = deduper.dedupe(urls(&["https://a.com/", "https://b.com/"]));
        assert_eq!(first.len(), 2);

        let second = deduper.dedupe(urls(&["https://a.com/", "https://b.com/"]));
        assert!(second.is_empty());
    }

    #[test]
    fn test_bloom_no_false_negatives() {
        let deduper = DedupeBloom::new(4, 1 << 16);

        for j in 0..100 {
            let batch = deduper.dedupe(urls(&[&format!("https://example.com/{}", j)]));
            // Observed URLs must never come back.
            let again = deduper.dedupe(batch);
            assert!(again.is_empty());
        }
    }

    #[test]
    fn test_bloom_minimum_sizes() {
        let deduper = DedupeBloom::new(0, 0);
        let ret = deduper.dedupe(urls(&["https://a.com/"]));
        assert_eq!(ret.len(), 1);
    }
}
