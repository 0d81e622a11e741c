//! Redis-like in-memory cache standing in for ElastiCache
//!
//! Each entry is a `(value, expiry_epoch)` pair. Expiry is checked when a
//! key is read and the entry is deleted at that point; nothing sweeps in the
//! background.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::db::clock::{system_clock, SharedClock};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Remaining lifetime of a key, as reported by `ttl`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<f64>,
}

impl CacheEntry {
    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
pub struct MockCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: SharedClock,
}

impl Default for MockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCache {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// SET, with EX when `ttl` is given
    pub fn set(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl.as_secs_f64());
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.into(),
                expires_at,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.lock();
        live_entry(&mut entries, key, now).map(|entry| entry.value.clone())
    }

    /// GETDEL: only one caller can take a given value
    pub fn take(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.lock();
        live_entry(&mut entries, key, now)?;
        entries.remove(key).map(|entry| entry.value)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        live_entry(&mut self.lock(), key, now).is_some()
    }

    pub fn ttl(&self, key: &str) -> KeyTtl {
        let now = self.clock.now();
        match live_entry(&mut self.lock(), key, now) {
            None => KeyTtl::Missing,
            Some(CacheEntry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(CacheEntry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(Duration::from_secs_f64((*at - now).max(0.0))),
        }
    }

    /// INCR. A new key starts from zero and gets `ttl_if_new`; an existing
    /// key keeps its expiry.
    pub fn incr(&self, key: &str, ttl_if_new: Option<Duration>) -> Result<i64, CacheError> {
        let now = self.clock.now();
        let mut entries = self.lock();

        if let Some(entry) = live_entry(&mut entries, key, now) {
            let next = entry
                .value
                .parse::<i64>()
                .map_err(|_| CacheError::NotAnInteger(key.to_string()))?
                + 1;
            entry.value = next.to_string();
            return Ok(next);
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value: "1".to_string(),
                expires_at: ttl_if_new.map(|ttl| now + ttl.as_secs_f64()),
            },
        );
        Ok(1)
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.set(key, serde_json::to_string(value)?, ttl);
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get(key)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(CacheError::from)
    }

    pub fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.take(key)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(CacheError::from)
    }

    /// Stored entries, expired ones included until they are next read
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ping(&self) -> bool {
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entry for `key` if it is still live; an expired entry is removed.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, CacheEntry>,
    key: &str,
    now: f64,
) -> Option<&'a mut CacheEntry> {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::clock::ManualClock;
    use serde::Deserialize;

    #[test]
    fn test_set_get_without_expiry() {
        let cache = MockCache::new();
        cache.set("greeting", "hello", None);
        assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
        assert_eq!(cache.ttl("greeting"), KeyTtl::Persistent);
        assert_eq!(cache.ttl("missing"), KeyTtl::Missing);
    }

    #[test]
    fn test_expired_entry_is_deleted_on_read() {
        let clock = ManualClock::at(0.0);
        let cache = MockCache::with_clock(clock.clone());
        cache.set("k", "v", Some(Duration::from_secs(10)));

        clock.advance(9.0);
        assert!(cache.exists("k"));
        assert_eq!(cache.ttl("k"), KeyTtl::Expires(Duration::from_secs(1)));

        clock.advance(1.0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_incr_keeps_original_expiry() {
        let clock = ManualClock::at(0.0);
        let cache = MockCache::with_clock(clock.clone());

        assert_eq!(cache.incr("fails", Some(Duration::from_secs(60))).unwrap(), 1);
        clock.advance(30.0);
        assert_eq!(cache.incr("fails", Some(Duration::from_secs(60))).unwrap(), 2);
        clock.advance(31.0);
        assert_eq!(cache.incr("fails", Some(Duration::from_secs(60))).unwrap(), 1);
    }

    #[test]
    fn test_incr_rejects_non_integer() {
        let cache = MockCache::new();
        cache.set("k", "abc", None);
        assert!(matches!(cache.incr("k", None), Err(CacheError::NotAnInteger(_))));
    }

    #[test]
    fn test_json_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Turn {
            text: String,
        }

        let cache = MockCache::new();
        let turn = Turn { text: "hi".to_string() };
        cache.set_json("turn", &turn, None).unwrap();
        assert_eq!(cache.get_json::<Turn>("turn").unwrap(), Some(turn));
        assert_eq!(cache.get_json::<Turn>("other").unwrap(), None);

        cache.set("bad", "{", None);
        assert!(cache.get_json::<Turn>("bad").is_err());
    }

    #[test]
    fn test_take_removes_value() {
        let clock = ManualClock::at(0.0);
        let cache = MockCache::with_clock(clock.clone());
        cache.set("k", "v", Some(Duration::from_secs(10)));

        assert_eq!(cache.take("k").as_deref(), Some("v"));
        assert_eq!(cache.take("k"), None);
        assert!(!cache.exists("k"));

        cache.set("k", "v", Some(Duration::from_secs(10)));
        clock.advance(11.0);
        assert_eq!(cache.take("k"), None);
    }

    #[test]
    fn test_delete() {
        let cache = MockCache::new();
        cache.set("k", "v", None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }
}
