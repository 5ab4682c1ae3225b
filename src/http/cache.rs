//! Time-windowed response cache

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of a request: path, normalized query and vehicle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub endpoint: String,
    /// Sorted so parameter order never splits the cache
    pub query: Vec<(String, String)>,
    pub vin: Option<String>,
}

impl CacheKey {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
            vin: None,
        }
    }

    pub fn with_vin(mut self, vin: impl Into<String>) -> Self {
        self.vin = Some(vin.into());
        self
    }

    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.query.sort();
        self.query.dedup();
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { '?' } else { '&' }, k, v)?;
        }
        Ok(())
    }
}

/// A cached response payload
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Arc<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Valid only while `now - fetched_at < max_age`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.fetched_at < max_age
    }
}

/// One entry per key; stale entries stay until overwritten
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    max_age: Duration,
}

impl ResponseCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Entry for `key` if still inside the window at `now`
    pub fn get_fresh(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.lock()
            .get(key)
            .filter(|entry| entry.is_fresh(now, self.max_age))
            .cloned()
    }

    /// Latest write wins
    pub fn insert(&self, key: CacheKey, payload: Arc<Value>, fetched_at: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at,
        };
        self.lock().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_order_does_not_matter() {
        let a = CacheKey::new("/vehicles").with_query([("b", "2"), ("a", "1")]);
        let b = CacheKey::new("/vehicles").with_query([("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/vehicles?a=1&b=2");
        assert_ne!(a, b.clone().with_vin("VIN1"));
    }

    #[test]
    fn freshness_window_is_exclusive() {
        let cache = ResponseCache::new(Duration::seconds(300));
        let t0 = Utc::now();
        let key = CacheKey::new("/vehicles");
        cache.insert(key.clone(), Arc::new(Value::Bool(true)), t0);

        assert!(cache.get_fresh(&key, t0 + Duration::seconds(299)).is_some());
        assert!(cache.get_fresh(&key, t0 + Duration::seconds(300)).is_none());
        // Stale entries are kept, not deleted
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_max_age_never_hits() {
        let cache = ResponseCache::new(Duration::zero());
        let t0 = Utc::now();
        let key = CacheKey::new("/vehicles");
        cache.insert(key.clone(), Arc::new(Value::Null), t0);
        assert!(cache.get_fresh(&key, t0).is_none());
    }
}
