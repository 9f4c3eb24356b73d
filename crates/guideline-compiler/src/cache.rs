//! Caching of normalizer responses.
//!
//! The cache is keyed by the normalized criterion text, so reformatted but
//! otherwise identical criteria share an entry. Only well-formed responses
//! are stored. A snapshot can be written to disk and loaded on the next run;
//! each entry carries a SHA-256 fingerprint of its key that is verified on
//! load.
//!
//! # Example
//!
//! ```rust
//! use guideline_compiler::{parse_response, CacheConfig, NormalizationCache};
//!
//! let cache = NormalizationCache::new(CacheConfig::default());
//! let response = parse_response(r#"{"primary_condition": {"term": "Sepsis"}}"#).unwrap();
//!
//! cache.put("Sepsis  with hypotension", response.clone());
//! assert_eq!(cache.get("sepsis with hypotension"), Some(response));
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use guideline_criteria::text::normalize_key;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::{CompilerError, CompilerResult};
use crate::export::sha256_hex;
use crate::response::NormalizerResponse;

/// A cached response with expiration tracking.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: NormalizerResponse,
    created_at: Instant,
}

impl CacheEntry {
    fn new(response: NormalizerResponse) -> Self {
        Self {
            response,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU cache of normalizer responses.
pub struct NormalizationCache {
    inner: Mutex<Inner>,
    ttl: Option<Duration>,
}

impl NormalizationCache {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            ttl: config.ttl,
        }
    }

    /// Looks up the response for a criterion text.
    ///
    /// Expired entries are removed and count as misses.
    pub fn get(&self, criterion_text: &str) -> Option<NormalizerResponse> {
        let key = normalize_key(criterion_text);
        let mut inner = self.inner.lock();
        let found = match inner.entries.get(&key) {
            Some(entry) if entry.is_expired(self.ttl) => None,
            Some(entry) => Some(entry.response.clone()),
            None => None,
        };
        match found {
            Some(response) => {
                inner.hits += 1;
                Some(response)
            }
            None => {
                inner.entries.pop(&key);
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores the response for a criterion text.
    pub fn put(&self, criterion_text: &str, response: NormalizerResponse) {
        let key = normalize_key(criterion_text);
        self.inner.lock().entries.put(key, CacheEntry::new(response));
    }

    /// Number of entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries and resets the statistics.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Removes expired entries.
    pub fn cleanup_expired(&self) {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            inner.entries.pop(&key);
        }
    }

    /// Returns hit/miss statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Writes the live entries to a JSON snapshot.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CompilerResult<()> {
        let path = path.as_ref();
        let snapshot = {
            let inner = self.inner.lock();
            // Least recently used first, so that loading restores the order.
            let entries = inner
                .entries
                .iter()
                .rev()
                .filter(|(_, entry)| !entry.is_expired(self.ttl))
                .map(|(key, entry)| SnapshotEntry {
                    key_sha256: fingerprint(key),
                    key: key.clone(),
                    response: entry.response.clone(),
                })
                .collect();
            CacheSnapshot {
                saved_at: Utc::now(),
                compiler_version: env!("CARGO_PKG_VERSION").to_string(),
                entries,
            }
        };

        let file = File::create(path).map_err(|e| CompilerError::io_error(path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)
            .map_err(|e| CompilerError::Serialization(e.to_string()))?;
        tracing::debug!(path = %path.display(), entries = snapshot.entries.len(), "saved normalization cache");
        Ok(())
    }

    /// Loads a snapshot into the cache, returning the number of entries read.
    ///
    /// Fails with [`CompilerError::HashMismatch`] if any entry's fingerprint
    /// does not match its key; nothing is inserted in that case.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> CompilerResult<usize> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CompilerError::io_error(path, e))?;
        let snapshot: CacheSnapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| CompilerError::Serialization(e.to_string()))?;

        for entry in &snapshot.entries {
            let actual = fingerprint(&entry.key);
            if actual != entry.key_sha256 {
                return Err(CompilerError::HashMismatch {
                    expected: entry.key_sha256.clone(),
                    actual,
                });
            }
        }

        let count = snapshot.entries.len();
        let mut inner = self.inner.lock();
        for entry in snapshot.entries {
            inner.entries.put(entry.key, CacheEntry::new(entry.response));
        }
        tracing::debug!(
            path = %path.display(),
            entries = count,
            saved_at = %snapshot.saved_at,
            "loaded normalization cache"
        );
        Ok(count)
    }
}

impl fmt::Debug for NormalizationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("NormalizationCache")
            .field("entries", &stats.entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 when there were no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Normalization Cache")?;
        writeln!(f, "  Entries:   {}", self.entries)?;
        writeln!(f, "  Hits:      {}", self.hits)?;
        writeln!(f, "  Misses:    {}", self.misses)?;
        writeln!(f, "  Hit rate:  {:.1}%", self.hit_rate())?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    saved_at: DateTime<Utc>,
    compiler_version: String,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    key_sha256: String,
    response: NormalizerResponse,
}

/// Hex SHA-256 of a cache key.
fn fingerprint(key: &str) -> String {
    sha256_hex(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::parse_response;
    use std::thread;
    use tempfile::tempdir;

    fn response(term: &str) -> NormalizerResponse {
        parse_response(&format!(r#"{{"primary_condition": {{"term": "{term}"}}}}"#)).unwrap()
    }

    fn cache(max_entries: usize, ttl: Option<Duration>) -> NormalizationCache {
        NormalizationCache::new(CacheConfig { max_entries, ttl })
    }

    #[test]
    fn test_cache_set_get() {
        let cache = cache(10, None);
        cache.put("Hypotension", response("Hypotension"));
        assert_eq!(cache.get("Hypotension"), Some(response("Hypotension")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_is_normalized() {
        let cache = cache(10, None);
        cache.put("  Severe   Hypoxemia ", response("Hypoxemia"));
        assert!(cache.get("severe hypoxemia").is_some());
    }

    #[test]
    fn test_hits_and_misses() {
        let cache = cache(10, None);
        assert!(cache.get("missing").is_none());
        cache.put("present", response("Present"));
        cache.get("present");
        cache.get("present");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 66.666).abs() < 0.01);
        assert!(stats.to_string().contains("Hits:      2"));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(2, None);
        cache.put("a", response("A"));
        cache.put("b", response("B"));
        cache.get("a");
        cache.put("c", response("C"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = cache(10, Some(Duration::from_millis(20)));
        cache.put("fever", response("Fever"));
        assert!(cache.get("fever").is_some());

        thread::sleep(Duration::from_millis(40));
        assert!(cache.get("fever").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = cache(10, Some(Duration::from_millis(20)));
        cache.put("a", response("A"));
        cache.put("b", response("B"));
        thread::sleep(Duration::from_millis(40));
        cache.cleanup_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let original = cache(10, None);
        original.put("Hypotension", response("Hypotension"));
        original.put("Bacteremia", response("Bacteremia"));
        original.save(&path).unwrap();

        let restored = cache(10, None);
        assert_eq!(restored.load(&path).unwrap(), 2);
        assert_eq!(restored.get("hypotension"), Some(response("Hypotension")));
        assert_eq!(restored.get("bacteremia"), Some(response("Bacteremia")));
    }

    #[test]
    fn test_snapshot_rejects_tampered_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let original = cache(10, None);
        original.put("Hypotension", response("Hypotension"));
        original.save(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, json.replace("\"hypotension\"", "\"hypertension\"")).unwrap();

        let restored = cache(10, None);
        let err = restored.load(&path).unwrap_err();
        assert!(matches!(err, CompilerError::HashMismatch { .. }));
        assert!(restored.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = cache(10, None).load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CompilerError::Io { .. }));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
