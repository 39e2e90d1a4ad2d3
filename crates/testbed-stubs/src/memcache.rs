//! In-memory cache service with statistics.
//!
//! [`MemoryMemcache`] mirrors the parts of a memcache service a test cares
//! about: values with optional TTLs, and the `hits`/`items` statistics that
//! sandboxes assert against.
//!
//! ## Usage
//!
//! ```
//! use testbed_stubs::memcache::{CacheValue, MemcacheStub, MemoryMemcache};
//!
//! let cache = MemoryMemcache::new();
//! cache.set("greeting", CacheValue::String("hello".to_string()), None);
//! assert!(cache.get("greeting").is_some());
//! assert_eq!(cache.get_stats().hits, 1);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A value that can be stored in the cache.
///
/// Supports common types: strings, integers, floats, raw bytes, and JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    /// A string value.
    String(String),
    /// A 64-bit integer value.
    Integer(i64),
    /// A 64-bit floating-point value.
    Float(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A JSON value.
    Json(serde_json::Value),
}

impl CacheValue {
    /// Returns the value as a string, if it is a `String` variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an i64, if it is an `Integer` variant.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The stored size in bytes, used for the `bytes` and `byte_hits` statistics.
    pub fn size(&self) -> u64 {
        let len = match self {
            Self::String(s) => s.len(),
            Self::Integer(_) | Self::Float(_) => 8,
            Self::Bytes(b) => b.len(),
            Self::Json(v) => v.to_string().len(),
        };
        len as u64
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Cache statistics, as reported by the service's statistics call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups of absent or expired keys.
    pub misses: u64,
    /// Bytes returned by successful lookups.
    pub byte_hits: u64,
    /// Live items currently stored.
    pub items: u64,
    /// Total size of the live items.
    pub bytes: u64,
    /// Age in seconds of the oldest live item.
    pub oldest_item_age: u64,
}

/// The cache service.
pub trait MemcacheStub: Send + Sync {
    /// Looks a key up, counting a hit or a miss.
    fn get(&self, key: &str) -> Option<CacheValue>;

    /// Stores a value, replacing any existing one.
    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>);

    /// Stores a value only if the key is absent. Returns `true` if stored.
    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool;

    /// Removes a key. Returns `true` if it was present.
    fn delete(&self, key: &str) -> bool;

    /// Adds `delta` to an integer value, returning the new value. Absent or
    /// non-numeric keys return `None`.
    fn incr(&self, key: &str, delta: i64) -> Option<i64>;

    /// Removes every item and resets the statistics.
    fn flush_all(&self);

    /// Returns the current statistics.
    fn get_stats(&self) -> CacheStats;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    stored_at: Instant,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            stored_at: now,
            expires_at: ttl.map(|d| now + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    byte_hits: u64,
}

impl CacheState {
    fn purge_expired(&mut self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

/// A thread-safe in-memory [`MemcacheStub`] with TTL support.
#[derive(Debug, Default)]
pub struct MemoryMemcache {
    state: Mutex<CacheState>,
}

impl MemoryMemcache {
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("MemoryMemcache lock poisoned")
    }
}

impl MemcacheStub for MemoryMemcache {
    fn get(&self, key: &str) -> Option<CacheValue> {
        let mut state = self.lock();
        state.purge_expired();
        let value = state.entries.get(key).map(|entry| entry.value.clone());
        match &value {
            Some(v) => {
                state.hits += 1;
                state.byte_hits += v.size();
            }
            None => state.misses += 1,
        }
        value
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let mut state = self.lock();
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        let mut state = self.lock();
        state.purge_expired();
        if state.entries.contains_key(key) {
            return false;
        }
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        true
    }

    fn delete(&self, key: &str) -> bool {
        let mut state = self.lock();
        state.purge_expired();
        state.entries.remove(key).is_some()
    }

    fn incr(&self, key: &str, delta: i64) -> Option<i64> {
        let mut state = self.lock();
        state.purge_expired();
        let entry = state.entries.get_mut(key)?;
        let current = match &entry.value {
            CacheValue::Integer(i) => *i,
            CacheValue::String(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        let next = current.checked_add(delta)?;
        entry.value = CacheValue::Integer(next);
        Some(next)
    }

    fn flush_all(&self) {
        let mut state = self.lock();
        *state = CacheState::default();
        tracing::debug!("memcache flushed");
    }

    fn get_stats(&self) -> CacheStats {
        let mut state = self.lock();
        state.purge_expired();
        let now = Instant::now();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            byte_hits: state.byte_hits,
            items: state.entries.len() as u64,
            bytes: state.entries.values().map(|e| e.value.size()).sum(),
            oldest_item_age: state
                .entries
                .values()
                .map(|e| now.duration_since(e.stored_at).as_secs())
                .max()
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_has_empty_stats() {
        let cache = MemoryMemcache::new();
        assert_eq!(cache.get_stats(), CacheStats::default());
    }

    #[test]
    fn test_hits_and_misses() {
        let cache = MemoryMemcache::new();
        cache.set("k", CacheValue::from("value"), None);

        assert_eq!(cache.get("k"), Some(CacheValue::from("value")));
        assert!(cache.get("missing").is_none());

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.byte_hits, 5);
        assert_eq!(stats.items, 1);
        assert_eq!(stats.bytes, 5);
    }

    #[test]
    fn test_set_does_not_count_hit() {
        let cache = MemoryMemcache::new();
        cache.set("k", CacheValue::Integer(1), None);
        cache.set("k", CacheValue::Integer(2), None);
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.items, 1);
    }

    #[test]
    fn test_add_only_when_absent() {
        let cache = MemoryMemcache::new();
        assert!(cache.add("k", CacheValue::from("a"), None));
        assert!(!cache.add("k", CacheValue::from("b"), None));
        assert_eq!(cache.get("k").unwrap().as_str(), Some("a"));
    }

    #[test]
    fn test_delete() {
        let cache = MemoryMemcache::new();
        cache.set("k", CacheValue::from("a"), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get_stats().items, 0);
    }

    #[test]
    fn test_incr() {
        let cache = MemoryMemcache::new();
        assert_eq!(cache.incr("counter", 1), None);

        cache.set("counter", CacheValue::Integer(10), None);
        assert_eq!(cache.incr("counter", 5), Some(15));

        cache.set("text", CacheValue::from("41"), None);
        assert_eq!(cache.incr("text", 1), Some(42));
        assert_eq!(cache.get("text").unwrap().as_integer(), Some(42));

        cache.set("bytes", CacheValue::Bytes(vec![1]), None);
        assert_eq!(cache.incr("bytes", 1), None);
    }

    #[test]
    fn test_expired_entries_are_not_items() {
        let cache = MemoryMemcache::new();
        cache.set("short", CacheValue::from("x"), Some(Duration::ZERO));
        cache.set("long", CacheValue::from("y"), Some(Duration::from_secs(300)));

        assert!(cache.get("short").is_none());
        assert_eq!(cache.get_stats().items, 1);
    }

    #[test]
    fn test_flush_all_resets_items_and_stats() {
        let cache = MemoryMemcache::new();
        cache.set("k", CacheValue::from("a"), None);
        cache.get("k");
        cache.get("nope");

        cache.flush_all();
        assert_eq!(cache.get_stats(), CacheStats::default());
    }

    #[test]
    fn test_value_sizes() {
        assert_eq!(CacheValue::Integer(1).size(), 8);
        assert_eq!(CacheValue::Bytes(vec![0; 3]).size(), 3);
        assert_eq!(CacheValue::Json(serde_json::json!({"a": 1})).size(), 7);
    }
}
