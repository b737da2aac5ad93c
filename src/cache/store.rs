//! In-memory keyed store of cached values with freshness metadata.
//!
//! The store is the single shared mutable resource of the data layer. It holds
//! type-erased JSON values so it stays generic over resources; readers
//! deserialize on the way out. It never fails: all fallibility lives upstream
//! in request outcomes.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use super::key::CacheKey;

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  /// Fetched recently enough to serve without network access
  Fresh,
  /// May be shown, but should be refreshed on next read
  Stale,
  /// A load for this key is in flight
  Fetching,
}

/// A single cached slot.
///
/// `value` is absent only while a first load for the key is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub value: Option<Value>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub state: EntryState,
}

#[derive(Debug, Clone)]
struct Slot {
  entry: CacheEntry,
  /// Last time a reader observed this slot, for retention eviction
  last_observed: DateTime<Utc>,
}

/// Keyed in-memory cache with staleness and retention windows.
///
/// A Fresh entry is reported Stale once `now - fetched_at` exceeds the
/// staleness window. Entries unobserved for longer than the retention window
/// are evicted entirely by an opportunistic sweep on access.
pub struct CacheStore {
  slots: Mutex<HashMap<CacheKey, Slot>>,
  stale_after: Duration,
  retain_for: Duration,
  /// Monotonic ids for optimistic creates. Counts down from -1 so locally
  /// assigned ids can never collide with the server's positive range.
  temp_id: AtomicI64,
  changes: broadcast::Sender<CacheKey>,
}

impl CacheStore {
  pub fn new(stale_after: Duration, retain_for: Duration) -> Self {
    let (changes, _) = broadcast::channel(64);
    Self {
      slots: Mutex::new(HashMap::new()),
      stale_after,
      retain_for,
      temp_id: AtomicI64::new(-1),
      changes,
    }
  }

  // A poisoned lock only means another thread panicked mid-update; the map
  // itself is still usable.
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Get the entry for a key, resolving effective staleness.
  ///
  /// Refreshes the retention clock for the slot.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let now = Utc::now();
    let mut slots = self.lock();
    Self::sweep(&mut slots, now, self.retain_for);

    let slot = slots.get_mut(key)?;
    slot.last_observed = now;

    let mut entry = slot.entry.clone();
    if entry.state == EntryState::Fresh {
      let expired = entry
        .fetched_at
        .map(|at| now - at > self.stale_after)
        .unwrap_or(true);
      if expired {
        entry.state = EntryState::Stale;
      }
    }
    Some(entry)
  }

  /// Store a value, marking it Fresh and stamping `fetched_at = now`.
  pub fn set(&self, key: &CacheKey, value: Value) {
    let now = Utc::now();
    {
      let mut slots = self.lock();
      Self::sweep(&mut slots, now, self.retain_for);
      slots.insert(
        key.clone(),
        Slot {
          entry: CacheEntry {
            value: Some(value),
            fetched_at: Some(now),
            state: EntryState::Fresh,
          },
          last_observed: now,
        },
      );
    }
    self.notify(key);
  }

  /// Mark an entry Stale without deleting its value, so stale data remains
  /// displayable while a refresh is pending.
  ///
  /// Idempotent: invalidating an already-Stale or absent key changes nothing
  /// and emits no event.
  pub fn invalidate(&self, key: &CacheKey) {
    let changed = {
      let mut slots = self.lock();
      match slots.get_mut(key) {
        Some(slot) if slot.entry.state != EntryState::Stale => {
          slot.entry.state = EntryState::Stale;
          true
        }
        _ => false,
      }
    };
    if changed {
      debug!(key = %key, "cache entry invalidated");
      self.notify(key);
    }
  }

  /// Drop an entry entirely.
  pub fn remove(&self, key: &CacheKey) {
    let removed = self.lock().remove(key).is_some();
    if removed {
      self.notify(key);
    }
  }

  /// Edit a cached value in place, leaving freshness metadata untouched.
  ///
  /// This is the optimistic-apply hook: a speculative write must not look
  /// like an authoritative fetch. No-op when the key holds no value yet.
  pub fn patch(&self, key: &CacheKey, edit: impl FnOnce(&mut Value)) {
    let patched = {
      let mut slots = self.lock();
      match slots.get_mut(key).and_then(|s| s.entry.value.as_mut()) {
        Some(value) => {
          edit(value);
          true
        }
        None => false,
      }
    };
    if patched {
      self.notify(key);
    }
  }

  /// Capture the exact entries for a set of keys, absent keys included.
  pub fn snapshot(&self, keys: &[CacheKey]) -> Vec<(CacheKey, Option<CacheEntry>)> {
    let slots = self.lock();
    keys
      .iter()
      .map(|key| (key.clone(), slots.get(key).map(|s| s.entry.clone())))
      .collect()
  }

  /// Put back an exact entry captured by [`snapshot`](Self::snapshot).
  ///
  /// `None` restores absence.
  pub fn restore(&self, key: &CacheKey, entry: Option<CacheEntry>) {
    let changed = {
      let mut slots = self.lock();
      match entry {
        Some(entry) => {
          slots.insert(
            key.clone(),
            Slot {
              entry,
              last_observed: Utc::now(),
            },
          );
          true
        }
        None => slots.remove(key).is_some(),
      }
    };
    if changed {
      self.notify(key);
    }
  }

  /// Mark a key as having a load in flight. Creates an empty slot when the
  /// key was absent.
  pub fn mark_fetching(&self, key: &CacheKey) {
    let now = Utc::now();
    {
      let mut slots = self.lock();
      slots
        .entry(key.clone())
        .and_modify(|slot| slot.entry.state = EntryState::Fetching)
        .or_insert_with(|| Slot {
          entry: CacheEntry {
            value: None,
            fetched_at: None,
            state: EntryState::Fetching,
          },
          last_observed: now,
        });
    }
    self.notify(key);
  }

  /// Record a failed load: the previous value (if any) stays displayable and
  /// drops back to Stale; a valueless placeholder slot is removed. Either
  /// way subscribers are told the key changed.
  pub fn fetch_failed(&self, key: &CacheKey) {
    let changed = {
      let mut slots = self.lock();
      match slots.get_mut(key) {
        Some(slot) if slot.entry.value.is_some() => {
          slot.entry.state = EntryState::Stale;
          true
        }
        Some(_) => {
          slots.remove(key);
          true
        }
        None => false,
      }
    };
    if changed {
      self.notify(key);
    }
  }

  /// Subscribe to change notifications. Each event names the key that
  /// changed; subscribers re-read through the store.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
    self.changes.subscribe()
  }

  /// Next locally assigned id for an optimistic create. Always negative.
  pub fn next_temp_id(&self) -> i64 {
    self.temp_id.fetch_sub(1, Ordering::SeqCst)
  }

  /// Teardown: drop every entry.
  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  fn sweep(slots: &mut HashMap<CacheKey, Slot>, now: DateTime<Utc>, retain_for: Duration) {
    slots.retain(|_, slot| now - slot.last_observed <= retain_for);
  }

  fn notify(&self, key: &CacheKey) {
    // No subscribers is fine
    let _ = self.changes.send(key.clone());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> CacheStore {
    CacheStore::new(Duration::minutes(2), Duration::minutes(10))
  }

  #[test]
  fn set_then_get_is_fresh() {
    let store = store();
    let key = CacheKey::collection("teachers");
    store.set(&key, json!([{"id": 1}]));

    let entry = store.get(&key).expect("entry");
    assert_eq!(entry.state, EntryState::Fresh);
    assert_eq!(entry.value, Some(json!([{"id": 1}])));
    assert!(entry.fetched_at.is_some());
  }

  #[test]
  fn fresh_entry_becomes_stale_after_window() {
    let store = CacheStore::new(Duration::zero(), Duration::minutes(10));
    let key = CacheKey::collection("teachers");
    store.set(&key, json!([]));

    // Zero staleness window: stale as soon as any time has passed
    std::thread::sleep(std::time::Duration::from_millis(2));
    let entry = store.get(&key).expect("entry");
    assert_eq!(entry.state, EntryState::Stale);
  }

  #[test]
  fn unobserved_entries_are_evicted() {
    let store = CacheStore::new(Duration::minutes(2), Duration::zero());
    let key = CacheKey::collection("teachers");
    store.set(&key, json!([]));

    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(store.get(&key).is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn invalidate_marks_stale_and_keeps_value() {
    let store = store();
    let key = CacheKey::detail("courses", 4);
    store.set(&key, json!({"id": 4}));

    store.invalidate(&key);
    let entry = store.get(&key).expect("entry");
    assert_eq!(entry.state, EntryState::Stale);
    assert_eq!(entry.value, Some(json!({"id": 4})));
  }

  #[test]
  fn invalidate_is_idempotent_and_silent_when_nothing_changes() {
    let store = store();
    let key = CacheKey::collection("teachers");
    let mut events = store.subscribe();

    // Absent key: no-op, no event
    store.invalidate(&key);

    store.set(&key, json!([]));
    store.invalidate(&key);
    store.invalidate(&key); // already stale, no event

    let mut seen = 0;
    while events.try_recv().is_ok() {
      seen += 1;
    }
    // One for set, one for the first invalidate
    assert_eq!(seen, 2);
  }

  #[test]
  fn patch_keeps_freshness_metadata() {
    let store = store();
    let key = CacheKey::collection("teachers");
    store.set(&key, json!([{"id": 1}]));
    let before = store.get(&key).expect("entry");

    store.patch(&key, |value| {
      if let Value::Array(items) = value {
        items.push(json!({"id": -1}));
      }
    });

    let after = store.get(&key).expect("entry");
    assert_eq!(after.state, before.state);
    assert_eq!(after.fetched_at, before.fetched_at);
    assert_eq!(after.value, Some(json!([{"id": 1}, {"id": -1}])));
  }

  #[test]
  fn patch_on_absent_key_is_noop() {
    let store = store();
    let key = CacheKey::collection("teachers");
    store.patch(&key, |_| panic!("must not run"));
    assert!(store.get(&key).is_none());
  }

  #[test]
  fn snapshot_restore_roundtrip_is_exact() {
    let store = store();
    let present = CacheKey::collection("teachers");
    let absent = CacheKey::detail("teachers", 9);
    store.set(&present, json!([{"id": 1}]));
    store.invalidate(&present);

    let saved = store.snapshot(&[present.clone(), absent.clone()]);

    store.patch(&present, |v| *v = json!([]));
    store.set(&absent, json!({"id": 9}));

    for (key, entry) in saved {
      store.restore(&key, entry);
    }

    let entry = store.get(&present).expect("entry");
    assert_eq!(entry.value, Some(json!([{"id": 1}])));
    assert_eq!(entry.state, EntryState::Stale);
    assert!(store.get(&absent).is_none());
  }

  #[test]
  fn temp_ids_are_negative_and_monotonic() {
    let store = store();
    let a = store.next_temp_id();
    let b = store.next_temp_id();
    assert!(a < 0);
    assert!(b < a);
  }

  #[test]
  fn fetch_failed_keeps_stale_value_but_drops_placeholder() {
    let store = store();
    let loaded = CacheKey::collection("teachers");
    store.set(&loaded, json!([]));
    store.mark_fetching(&loaded);
    store.fetch_failed(&loaded);
    assert_eq!(store.get(&loaded).expect("entry").state, EntryState::Stale);

    let empty = CacheKey::detail("teachers", 1);
    store.mark_fetching(&empty);
    store.fetch_failed(&empty);
    assert!(store.get(&empty).is_none());
  }

  #[test]
  fn failed_load_notifies_subscribers() {
    let store = store();
    let key = CacheKey::collection("teachers");
    store.set(&key, json!([]));

    let mut events = store.subscribe();
    store.mark_fetching(&key);
    store.fetch_failed(&key);

    // One event for the in-flight marking, one for the failure
    assert_eq!(events.try_recv(), Ok(key.clone()));
    assert_eq!(events.try_recv(), Ok(key));
    assert!(events.try_recv().is_err());

    // Failing a key that holds nothing emits nothing
    let mut events = store.subscribe();
    store.fetch_failed(&CacheKey::detail("teachers", 1));
    assert!(events.try_recv().is_err());
  }

  #[test]
  fn clear_drops_everything() {
    let store = store();
    store.set(&CacheKey::collection("teachers"), json!([]));
    store.set(&CacheKey::collection("courses"), json!([]));
    store.clear();
    assert!(store.is_empty());
  }
}
