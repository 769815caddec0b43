//! Bounded result cache for expensive generation calls

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of leading characters that take part in the fingerprint
const FINGERPRINT_PREFIX_CHARS: usize = 100;

/// Operation kinds whose results may be memoised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Summary,
    Quiz,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Summary => "summary",
            CacheKind::Quiz => "quiz",
        }
    }
}

/// Cache key: operation kind joined with the first 100 characters of the
/// input and the input's character count. Distinct texts sharing both collide.
pub fn fingerprint(kind: CacheKind, text: &str) -> String {
    let prefix: String = text.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
    format!("{}_{}{}", kind.as_str(), prefix, text.chars().count())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Value,
    inserted_at: Instant,
}

/// A fresh cache entry returned by [`ResultCache::lookup`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub key: String,
    pub result: Value,
    pub age: Duration,
}

/// Insertion-ordered cache. Lookups never refresh an entry's position and
/// stale entries stay in place until overwritten or evicted.
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(10, Duration::from_secs(60 * 60))
    }

    pub fn lookup(&self, kind: CacheKind, text: &str) -> Option<CacheHit> {
        self.lookup_at(kind, text, Instant::now())
    }

    pub fn lookup_at(&self, kind: CacheKind, text: &str, now: Instant) -> Option<CacheHit> {
        let key = fingerprint(kind, text);
        let entry = self.entries.get(&key)?;
        let age = now.saturating_duration_since(entry.inserted_at);
        if age >= self.ttl {
            return None;
        }
        Some(CacheHit {
            key,
            result: entry.result.clone(),
            age,
        })
    }

    pub fn store(&mut self, kind: CacheKind, text: &str, result: Value) {
        self.store_at(kind, text, result, Instant::now());
    }

    pub fn store_at(&mut self, kind: CacheKind, text: &str, result: Value, now: Instant) {
        let key = fingerprint(kind, text);

        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
            self.order.push_back(key.clone());
        }

        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
            },
        );
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.entries.remove(&oldest);
        }
    }

    /// Whether the key is physically present, fresh or not
    pub fn contains(&self, kind: CacheKind, text: &str) -> bool {
        self.entries.contains_key(&fingerprint(kind, text))
    }

    /// Keys from oldest to newest insertion
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_format() {
        let text = "The sun is a star. It is very hot.";
        assert_eq!(
            fingerprint(CacheKind::Summary, text),
            "summary_The sun is a star. It is very hot.34"
        );
    }

    #[test]
    fn test_fingerprint_collision_is_preserved() {
        let shared = "a".repeat(100);
        let first = format!("{}XYZ", shared);
        let second = format!("{}QRS", shared);
        assert_eq!(
            fingerprint(CacheKind::Quiz, &first),
            fingerprint(CacheKind::Quiz, &second)
        );
        assert_ne!(
            fingerprint(CacheKind::Quiz, &first),
            fingerprint(CacheKind::Summary, &first)
        );
    }

    #[test]
    fn test_hit_after_store() {
        let mut cache = ResultCache::with_defaults();
        cache.store(CacheKind::Summary, "hello", json!({"summary": "hi"}));

        let hit = cache.lookup(CacheKind::Summary, "hello").unwrap();
        assert_eq!(hit.result, json!({"summary": "hi"}));
        assert!(cache.lookup(CacheKind::Quiz, "hello").is_none());
    }

    #[test]
    fn test_eleventh_insert_evicts_first() {
        let mut cache = ResultCache::with_defaults();
        let start = Instant::now();
        for i in 0..10 {
            cache.store_at(CacheKind::Summary, &format!("text {}", i), json!(i), start);
        }
        // Reading the oldest entry must not protect it
        assert!(cache.lookup_at(CacheKind::Summary, "text 0", start).is_some());

        cache.store_at(CacheKind::Summary, "text 10", json!(10), start);

        assert_eq!(cache.len(), 10);
        assert!(!cache.contains(CacheKind::Summary, "text 0"));
        for i in 1..=10 {
            assert!(cache.contains(CacheKind::Summary, &format!("text {}", i)));
        }
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = ResultCache::with_defaults();
        let start = Instant::now();
        for i in 0..10 {
            cache.store_at(CacheKind::Quiz, &format!("text {}", i), json!(i), start);
        }

        cache.store_at(CacheKind::Quiz, "text 5", json!("again"), start);

        assert_eq!(cache.len(), 10);
        assert!(cache.contains(CacheKind::Quiz, "text 0"));
        let order: Vec<&str> = cache.keys().collect();
        assert_eq!(order[5], fingerprint(CacheKind::Quiz, "text 5"));
    }

    #[test]
    fn test_stale_entry_is_a_miss_but_stays() {
        let mut cache = ResultCache::with_defaults();
        let start = Instant::now();
        cache.store_at(CacheKind::Summary, "old", json!("v1"), start);

        let just_fresh = start + Duration::from_millis(3_599_999);
        assert!(cache.lookup_at(CacheKind::Summary, "old", just_fresh).is_some());

        let stale = start + Duration::from_millis(3_600_001);
        assert!(cache.lookup_at(CacheKind::Summary, "old", stale).is_none());
        assert!(cache.contains(CacheKind::Summary, "old"));

        cache.store_at(CacheKind::Summary, "old", json!("v2"), stale);
        let hit = cache.lookup_at(CacheKind::Summary, "old", stale).unwrap();
        assert_eq!(hit.result, json!("v2"));
        assert_eq!(cache.len(), 1);
    }
}
