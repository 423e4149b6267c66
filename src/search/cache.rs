use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::search::query::SearchOptions;
use crate::search::results::SearchResults;

/// Cache key: normalized query plus every option that affects the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    terms: Vec<String>,
    limit: usize,
    and_logic: bool,
    labels: Vec<String>,
    tags: Vec<(String, Option<String>)>,
    include_documents: bool,
}

/// LRU cache of search results. Every successful mutation clears it, so a
/// cached entry can never outlive the index state it was computed from.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, SearchResults>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(
        &self,
        terms: &[String],
        limit: usize,
        options: &SearchOptions,
    ) -> Option<SearchResults> {
        let key = Self::key(terms, limit, options);
        self.entries.lock().get(&key).cloned()
    }

    pub fn put(
        &self,
        terms: &[String],
        limit: usize,
        options: &SearchOptions,
        results: SearchResults,
    ) {
        let key = Self::key(terms, limit, options);
        self.entries.lock().put(key, results);
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    fn key(terms: &[String], limit: usize, options: &SearchOptions) -> CacheKey {
        CacheKey {
            terms: terms.to_vec(),
            limit,
            and_logic: options.and_logic,
            labels: options.labels.clone(),
            tags: options.tags.clone(),
            include_documents: options.include_documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = QueryCache::new(8);
        let options = SearchOptions::default();
        let results = SearchResults::empty(Duration::from_millis(1));

        assert!(cache.get(&terms(&["apple"]), 10, &options).is_none());
        cache.put(&terms(&["apple"]), 10, &options, results.clone());
        assert_eq!(cache.get(&terms(&["apple"]), 10, &options), Some(results));
    }

    #[test]
    fn test_options_distinguish_entries() {
        let cache = QueryCache::new(8);
        let or_options = SearchOptions::default();
        let and_options = SearchOptions::and_logic();
        cache.put(
            &terms(&["apple"]),
            10,
            &or_options,
            SearchResults::empty(Duration::ZERO),
        );
        assert!(cache.get(&terms(&["apple"]), 10, &and_options).is_none());
        assert!(cache.get(&terms(&["apple"]), 20, &or_options).is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = QueryCache::new(8);
        let options = SearchOptions::default();
        cache.put(
            &terms(&["apple"]),
            10,
            &options,
            SearchResults::empty(Duration::ZERO),
        );
        cache.invalidate_all();
        assert!(cache.get(&terms(&["apple"]), 10, &options).is_none());
    }
}
