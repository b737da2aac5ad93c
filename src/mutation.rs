//! Optimistic mutation lifecycle against the cache store.
//!
//! Every write follows the same sequence: snapshot the entries it may touch,
//! apply a speculative update so readers see the write immediately, dispatch
//! the network call, and settle. Settle invalidates the affected keys exactly
//! once — after success, so the next read refetches authoritative data, or
//! after rollback, which has already restored every snapshotted entry to its
//! exact pre-mutation value. Writes are never retried.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::error::ApiError;
use crate::resources::Entity;

/// Lifecycle of a single mutation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
  Idle,
  Snapshotting,
  OptimisticallyApplied,
  Committing,
  RollingBack,
  Settled,
}

/// Pre-mutation snapshot of every entry a mutation may affect.
///
/// Created at mutation start, consumed at settle, never persisted. Doubles as
/// a guard: if the mutation future is dropped before settling, the outcome of
/// the dispatched call is unknown, so the snapshot is restored and the
/// affected keys are still invalidated.
struct MutationContext {
  store: Arc<CacheStore>,
  saved: Option<Vec<(CacheKey, Option<CacheEntry>)>>,
  affected: Vec<CacheKey>,
  settled: bool,
}

impl MutationContext {
  fn capture(store: Arc<CacheStore>, affected: Vec<CacheKey>) -> Self {
    let saved = Some(store.snapshot(&affected));
    Self {
      store,
      saved,
      affected,
      settled: false,
    }
  }

  /// Restore every snapshotted entry exactly — value, metadata and absence.
  fn rollback(&mut self) {
    if let Some(saved) = self.saved.take() {
      for (key, entry) in saved {
        self.store.restore(&key, entry);
      }
    }
  }

  /// Invalidate every affected key, exactly once per mutation.
  fn settle(&mut self) {
    if self.settled {
      return;
    }
    self.settled = true;
    for key in &self.affected {
      self.store.invalidate(key);
    }
  }
}

impl Drop for MutationContext {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    warn!(state = ?MutationState::RollingBack, "mutation abandoned mid-dispatch, rolling back");
    self.rollback();
    self.settle();
  }
}

/// Orchestrates optimistic writes over the shared store.
///
/// The coordinator owns no network client: each operation receives the
/// prepared call as a future, which is first polled only after the optimistic
/// apply has completed (optimistic apply happens-before dispatch).
#[derive(Clone)]
pub struct MutationCoordinator {
  store: Arc<CacheStore>,
}

impl MutationCoordinator {
  pub fn new(store: Arc<CacheStore>) -> Self {
    Self { store }
  }

  /// Create an entity. Affected keys: the collection.
  ///
  /// The optimistic stand-in gets a locally assigned negative id; the
  /// post-settle refetch replaces it with the server-assigned one.
  pub async fn create<E, Fut>(&self, payload: &E::Create, send: Fut) -> Result<E, ApiError>
  where
    E: Entity,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    let collection = CacheKey::collection(E::RESOURCE);

    debug!(resource = E::RESOURCE, state = ?MutationState::Snapshotting, "create");
    let ctx = MutationContext::capture(Arc::clone(&self.store), vec![collection.clone()]);

    let temp_id = self.store.next_temp_id();
    let optimistic = E::from_create(payload, temp_id);
    self.store.patch(&collection, |value| {
      if let Value::Array(items) = value {
        if let Ok(item) = serde_json::to_value(&optimistic) {
          items.push(item);
        }
      }
    });
    debug!(resource = E::RESOURCE, temp_id, state = ?MutationState::OptimisticallyApplied, "create");

    self.run(ctx, send, decode_entity::<E>).await
  }

  /// Update an entity by merging a partial payload. Affected keys: the
  /// collection and the detail slot for `id`.
  pub async fn update<E, Fut>(&self, id: i64, payload: &E::Update, send: Fut) -> Result<E, ApiError>
  where
    E: Entity,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    let collection = CacheKey::collection(E::RESOURCE);
    let detail = CacheKey::detail(E::RESOURCE, id);

    debug!(resource = E::RESOURCE, id, state = ?MutationState::Snapshotting, "update");
    let ctx = MutationContext::capture(
      Arc::clone(&self.store),
      vec![collection.clone(), detail.clone()],
    );

    self.store.patch(&collection, |value| {
      if let Value::Array(items) = value {
        for item in items.iter_mut() {
          apply_to_value::<E>(item, id, payload);
        }
      }
    });
    self
      .store
      .patch(&detail, |value| apply_to_value::<E>(value, id, payload));
    debug!(resource = E::RESOURCE, id, state = ?MutationState::OptimisticallyApplied, "update");

    self.run(ctx, send, decode_entity::<E>).await
  }

  /// Delete an entity. Affected keys: the collection.
  pub async fn delete<E, Fut>(&self, id: i64, send: Fut) -> Result<(), ApiError>
  where
    E: Entity,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    let collection = CacheKey::collection(E::RESOURCE);

    debug!(resource = E::RESOURCE, id, state = ?MutationState::Snapshotting, "delete");
    let ctx = MutationContext::capture(Arc::clone(&self.store), vec![collection.clone()]);

    self.store.patch(&collection, |value| {
      if let Value::Array(items) = value {
        items.retain(|item| {
          serde_json::from_value::<E>(item.clone())
            .map(|entity| entity.id() != id)
            .unwrap_or(true)
        });
      }
    });
    debug!(resource = E::RESOURCE, id, state = ?MutationState::OptimisticallyApplied, "delete");

    self.run(ctx, send, |_| Ok(())).await
  }

  /// Dispatch, then settle.
  ///
  /// On any error the snapshot is restored before invalidation, so a failed
  /// mutation leaves no trace beyond the Stale marking. Invalidation runs on
  /// every path, exactly once per affected key — the context's drop guard
  /// covers the path where this future is dropped mid-dispatch.
  async fn run<T, Fut>(
    &self,
    mut ctx: MutationContext,
    send: Fut,
    decode: impl FnOnce(Value) -> Result<T, ApiError>,
  ) -> Result<T, ApiError>
  where
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    debug!(state = ?MutationState::Committing, "dispatching mutation");
    let outcome = send.await.and_then(decode);

    let result = match outcome {
      Ok(value) => Ok(value),
      Err(err) => {
        warn!(error = %err, state = ?MutationState::RollingBack, "mutation failed, rolling back");
        ctx.rollback();
        Err(err)
      }
    };

    ctx.settle();
    debug!(state = ?MutationState::Settled, "mutation settled");

    result
  }
}

fn decode_entity<E: Entity>(value: Value) -> Result<E, ApiError> {
  serde_json::from_value(value).map_err(|_| ApiError::protocol(0, None))
}

/// Merge a partial payload into a serialized entity, field by field.
///
/// Only an entity carrying `id` is touched, so mapping this over a cached
/// collection updates exactly the right member. Values that do not decode as
/// `E` are left alone.
fn apply_to_value<E: Entity>(value: &mut Value, id: i64, update: &E::Update) {
  let Ok(mut entity) = serde_json::from_value::<E>(value.clone()) else {
    return;
  };
  if entity.id() != id {
    return;
  }
  entity.apply_update(update);
  if let Ok(updated) = serde_json::to_value(&entity) {
    *value = updated;
  }
}
