//! A process-scoped TTL cache and the clock it reads.
//!
//! The cache is injected into whatever needs it (the policy store today)
//! instead of living in a global, so tests can drive time with
//! [`ManualClock`] and evict deterministically.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Source of "now" for everything time-dependent in the pipeline.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Arc::new(Mutex::new(start)) }
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|p| p.into_inner())
  }
}

// ─── TtlCache ────────────────────────────────────────────────────────────────

struct Entry<V> {
  value:     V,
  stored_at: DateTime<Utc>,
}

/// Read-mostly map whose entries expire `ttl` after insertion.
///
/// Readers may observe a value up to `ttl` old. Writers of the underlying
/// data must call [`TtlCache::invalidate`] after a successful write.
pub struct TtlCache<K, V> {
  ttl:     Duration,
  clock:   Arc<dyn Clock>,
  entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
  K: Eq + Hash,
  V: Clone,
{
  pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self { ttl, clock, entries: Mutex::new(HashMap::new()) }
  }

  /// Return the cached value for `key` if it has not expired. Expired
  /// entries are evicted on access.
  pub fn get(&self, key: &K) -> Option<V> {
    let now = self.clock.now();
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    match entries.get(key) {
      Some(e) if now - e.stored_at < self.ttl => Some(e.value.clone()),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  pub fn insert(&self, key: K, value: V) {
    let stored_at = self.clock.now();
    self
      .entries
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(key, Entry { value, stored_at });
  }

  pub fn invalidate(&self, key: &K) {
    self
      .entries
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .remove(key);
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn cache(ttl_secs: i64) -> (TtlCache<&'static str, u32>, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    let cache = TtlCache::new(Duration::seconds(ttl_secs), Arc::new(clock.clone()));
    (cache, clock)
  }

  #[test]
  fn hit_before_ttl() {
    let (c, clock) = cache(60);
    c.insert("a", 1);
    clock.advance(Duration::seconds(59));
    assert_eq!(c.get(&"a"), Some(1));
  }

  #[test]
  fn expires_at_ttl_and_is_evicted() {
    let (c, clock) = cache(60);
    c.insert("a", 1);
    clock.advance(Duration::seconds(60));
    assert_eq!(c.get(&"a"), None);
    assert!(c.entries.lock().unwrap().is_empty());
  }

  #[test]
  fn invalidate_removes_only_that_key() {
    let (c, _clock) = cache(60);
    c.insert("a", 1);
    c.insert("b", 2);
    c.invalidate(&"a");
    assert_eq!(c.get(&"a"), None);
    assert_eq!(c.get(&"b"), Some(2));
  }

  #[test]
  fn reinsert_refreshes_age() {
    let (c, clock) = cache(60);
    c.insert("a", 1);
    clock.advance(Duration::seconds(45));
    c.insert("a", 2);
    clock.advance(Duration::seconds(45));
    assert_eq!(c.get(&"a"), Some(2));
  }
}
