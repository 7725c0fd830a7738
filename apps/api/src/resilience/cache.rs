//! Bounded, time-expiring result cache keyed by a content fingerprint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::models::analysis::AnalysisResult;

/// Only this many leading characters of each input feed the fingerprint.
/// Two long inputs sharing a prefix therefore share a key.
pub const KEY_PREFIX_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AnalysisResult,
    inserted_at: Instant,
}

/// Process-wide result cache. Constructed once at startup and shared by handle.
pub struct AnalysisCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl AnalysisCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stable fingerprint of a (document, role description) pair: SHA-256
    /// over the whitespace-collapsed, lower-cased prefix of each input.
    pub fn key(document: &str, role_description: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint_prefix(document).as_bytes());
        hasher.update([0x1f]);
        hasher.update(fingerprint_prefix(role_description).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the cached result, or `None` when absent or expired. Expired
    /// entries are removed on read.
    pub fn get(&self, key: &str) -> Option<AnalysisResult> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() > self.config.ttl,
        };
        if expired {
            entries.remove(key);
            debug!("Cache entry {key} expired");
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts a result, then drops the oldest entries beyond capacity.
    pub fn put(&self, key: String, value: AnalysisResult) {
        let mut entries = self.lock();
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );

        if entries.len() > self.config.capacity {
            let overflow = entries.len() - self.config.capacity;
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);
            for (k, _) in by_age.into_iter().take(overflow) {
                entries.remove(&k);
            }
            debug!("Cache evicted {overflow} entries over capacity");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        // The map stays consistent even if a holder panicked mid-call.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fingerprint_prefix(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(KEY_PREFIX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::FallbackScorer;

    fn result() -> AnalysisResult {
        FallbackScorer.score("react developer", "react aws leadership")
    }

    #[test]
    fn test_key_is_stable_and_normalized() {
        let a = AnalysisCache::key("Hello   World", "Role");
        let b = AnalysisCache::key("hello world", "  role ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, AnalysisCache::key("hello world", "other role"));
    }

    #[test]
    fn test_key_ignores_content_past_prefix() {
        let base = "a".repeat(KEY_PREFIX_CHARS);
        let a = AnalysisCache::key(&format!("{base} first tail"), "role");
        let b = AnalysisCache::key(&format!("{base} second tail"), "role");
        assert_eq!(a, b);
    }

    #[test]
    fn test_inputs_do_not_bleed_across_boundary() {
        assert_ne!(AnalysisCache::key("ab", "c"), AnalysisCache::key("a", "bc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_inserted_value() {
        let cache = AnalysisCache::new(CacheConfig::default());
        let value = result();
        cache.put("k".to_string(), value.clone());
        assert_eq!(cache.get("k"), Some(value));
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_removed() {
        let cache = AnalysisCache::new(CacheConfig {
            capacity: 10,
            ttl: Duration::from_secs(60),
        });
        cache.put("k".to_string(), result());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_first() {
        let cache = AnalysisCache::new(CacheConfig {
            capacity: 2,
            ttl: Duration::from_secs(600),
        });
        for k in ["first", "second", "third"] {
            cache.put(k.to_string(), result());
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
    }
}
