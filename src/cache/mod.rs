//! Generic in-memory caching layer.
//!
//! This module is resource-agnostic:
//! - Entries are keyed by a structural `(resource, optional id)` tuple
//! - Values are type-erased JSON; readers deserialize on the way out
//! - Freshness and retention are time-window policies of the store
//! - Changes are broadcast to subscribers by key

mod key;
mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore, EntryState};
