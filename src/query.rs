//! Cache-first reads with per-key load deduplication.
//!
//! A read returns fresh cached data without touching the network. On a stale
//! or missing entry the first caller dispatches the loader (with one bounded
//! retry) on a detached task and awaits its published result; concurrent
//! readers of the same key attach to the pending load instead of dispatching
//! their own. Because the load runs detached, a reader abandoning interest is
//! advisory: the load still completes and updates the store for the benefit
//! of other subscribers. On failure the previous cached value stays available
//! for display alongside the error.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStore, EntryState};
use crate::error::ApiError;

/// Outcome of one load, shared between the leader and attached readers.
type LoadResult = Result<Value, ApiError>;

/// Status flag accompanying read results.
#[derive(Debug, Clone)]
pub enum QueryStatus {
  /// Settled, or disabled (no identifier bound yet)
  Idle,
  /// A load for the key is in flight
  Loading,
  /// The load failed after the configured retries
  Error(ApiError),
}

/// Result of a read: the current value (possibly stale) plus a status flag.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  pub data: Option<T>,
  pub status: QueryStatus,
}

impl<T> QueryResult<T> {
  fn idle(data: Option<T>) -> Self {
    Self {
      data,
      status: QueryStatus::Idle,
    }
  }

  fn failed(data: Option<T>, error: ApiError) -> Self {
    Self {
      data,
      status: QueryStatus::Error(error),
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self.status, QueryStatus::Error(_))
  }

  pub fn error(&self) -> Option<&ApiError> {
    match &self.status {
      QueryStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Deduplicating cache-first reader over a shared store.
#[derive(Clone)]
pub struct QueryClient {
  store: Arc<CacheStore>,
  /// One slot per key with a load in flight. Leadership is decided under
  /// this lock, which is what makes the single-flight guarantee hold.
  inflight: Arc<Mutex<HashMap<CacheKey, watch::Receiver<Option<LoadResult>>>>>,
  retry: u32,
  retry_delay: Duration,
}

impl QueryClient {
  pub fn new(store: Arc<CacheStore>, retry: u32, retry_delay: Duration) -> Self {
    Self {
      store,
      inflight: Arc::new(Mutex::new(HashMap::new())),
      retry,
      retry_delay,
    }
  }

  /// Read through the cache, loading on miss or staleness.
  ///
  /// The loader produces the raw envelope `data`; it is invoked at most once
  /// across all concurrent readers of `key`, plus the configured retries.
  /// The load itself runs on a detached task, so dropping this future does
  /// not cancel it and never wedges the key.
  pub async fn read<T, F, Fut>(&self, key: &CacheKey, loader: F) -> QueryResult<T>
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult> + Send + 'static,
  {
    let previous = match self.store.get(key) {
      Some(entry) => {
        if entry.state == EntryState::Fresh {
          if let Some(data) = entry.value.clone().and_then(|v| serde_json::from_value(v).ok()) {
            return QueryResult::idle(Some(data));
          }
          // Cached value no longer decodes as T; reload below
        }
        entry.value
      }
      None => None,
    };

    let rx = {
      let mut inflight = self
        .inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      match inflight.get(key) {
        Some(rx) => {
          debug!(key = %key, "attaching to in-flight load");
          rx.clone()
        }
        None => {
          let (tx, rx) = watch::channel(None);
          inflight.insert(key.clone(), rx.clone());
          self.store.mark_fetching(key);
          self.dispatch(key.clone(), loader, tx);
          rx
        }
      }
    };

    let outcome = Self::await_published(rx).await;
    self.settle(key, outcome, previous)
  }

  /// Read bound to an optional identifier.
  ///
  /// With no key the read is disabled: no network access, `Idle` until a
  /// defined identifier is supplied.
  pub async fn read_when<T, F, Fut>(&self, key: Option<CacheKey>, loader: F) -> QueryResult<T>
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult> + Send + 'static,
  {
    match key {
      Some(key) => self.read(&key, loader).await,
      None => QueryResult::idle(None),
    }
  }

  /// Current entry for a key without triggering a load. Concurrent observers
  /// see `Fetching` here while a leader is working.
  pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.store.get(key)
  }

  /// Non-blocking status probe for a key.
  pub fn status_of(&self, key: &CacheKey) -> QueryStatus {
    match self.store.get(key) {
      Some(entry) if entry.state == EntryState::Fetching => QueryStatus::Loading,
      _ => QueryStatus::Idle,
    }
  }

  /// Run the load on a detached task. The task owns the store update, the
  /// in-flight cleanup and the result publication, so it runs to completion
  /// even when every reader of `key` has gone away.
  fn dispatch<F, Fut>(&self, key: CacheKey, loader: F, tx: watch::Sender<Option<LoadResult>>)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult> + Send + 'static,
  {
    let worker = self.clone();
    tokio::spawn(async move {
      let outcome = worker.load(&key, loader).await;
      match &outcome {
        Ok(value) => worker.store.set(&key, value.clone()),
        Err(err) => {
          warn!(key = %key, error = %err, "load failed");
          worker.store.fetch_failed(&key);
        }
      }
      worker
        .inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&key);
      // Publish after the store update so attached readers always observe
      // the stored value when they wake
      let _ = tx.send(Some(outcome));
    });
  }

  async fn await_published(mut rx: watch::Receiver<Option<LoadResult>>) -> LoadResult {
    match rx.wait_for(|result| result.is_some()).await {
      Ok(result) => match result.clone() {
        Some(outcome) => outcome,
        None => Err(ApiError::unknown("load produced no result")),
      },
      // The load task died without publishing (a loader panic)
      Err(_) => Err(ApiError::unknown("load was cancelled")),
    }
  }

  /// Run the loader with the configured bounded retry.
  async fn load<F, Fut>(&self, key: &CacheKey, loader: F) -> LoadResult
  where
    F: Fn() -> Fut,
    Fut: Future<Output = LoadResult>,
  {
    let mut attempts = 0;
    loop {
      match loader().await {
        Ok(value) => return Ok(value),
        Err(err) if attempts < self.retry => {
          attempts += 1;
          debug!(key = %key, error = %err, attempt = attempts, "retrying read");
          tokio::time::sleep(self.retry_delay).await;
        }
        Err(err) => return Err(err),
      }
    }
  }

  fn settle<T: DeserializeOwned>(
    &self,
    key: &CacheKey,
    outcome: LoadResult,
    previous: Option<Value>,
  ) -> QueryResult<T> {
    match outcome {
      Ok(value) => match serde_json::from_value(value) {
        Ok(data) => QueryResult::idle(Some(data)),
        Err(_) => {
          // The payload does not decode as T; keep what the caller could
          // already display alongside the error
          let stale = previous.and_then(|value| serde_json::from_value(value).ok());
          QueryResult::failed(stale, ApiError::protocol(0, None))
        }
      },
      Err(err) => {
        // Surface the error but keep whatever was cached displayable
        let stale = self
          .store
          .get(key)
          .and_then(|entry| entry.value)
          .or(previous)
          .and_then(|value| serde_json::from_value(value).ok());
        QueryResult::failed(stale, err)
      }
    }
  }
}
