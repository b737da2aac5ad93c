//! Top-level client bundling transport, cache, reads and writes.

use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheStore;
use crate::config::{Config, ConfigError};
use crate::http::HttpClient;
use crate::mutation::MutationCoordinator;
use crate::query::QueryClient;
use crate::resources::{Entity, Resource};

/// Owned data-access client for one API endpoint.
///
/// Each instance owns its cache, so independent instances (one per test case,
/// say) never share state. Cloning is cheap and shares the underlying cache.
/// [`clear`](Self::clear) is the explicit teardown.
#[derive(Clone)]
pub struct AulaClient {
  http: HttpClient,
  store: Arc<CacheStore>,
  queries: QueryClient,
  mutations: MutationCoordinator,
}

impl AulaClient {
  pub fn new(config: &Config) -> Result<Self, ConfigError> {
    let base_url = config.base_url()?;
    if config.write_retry > 0 {
      warn!(
        write_retry = config.write_retry,
        "write_retry is not honored; writes are never retried"
      );
    }

    let http = HttpClient::new(base_url, config.timeout());
    let store = Arc::new(CacheStore::new(config.stale_after(), config.retain_for()));
    let queries = QueryClient::new(
      Arc::clone(&store),
      config.read_retry,
      config.read_retry_delay(),
    );
    let mutations = MutationCoordinator::new(Arc::clone(&store));

    Ok(Self {
      http,
      store,
      queries,
      mutations,
    })
  }

  /// Typed handle for one resource.
  pub fn resource<E: Entity>(&self) -> Resource<E> {
    Resource::new(
      self.http.clone(),
      self.queries.clone(),
      self.mutations.clone(),
    )
  }

  /// The shared cache store, for subscriptions and direct inspection.
  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  /// Teardown: drop every cached entry.
  pub fn clear(&self) {
    self.store.clear();
  }
}
