//! Structural cache keys.

use std::fmt;

/// Identity of a cache slot: a resource name plus an optional entity id.
///
/// Two keys with equal components refer to the same slot. A key without an id
/// denotes the full collection; a key with an id denotes one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  resource: String,
  id: Option<i64>,
}

impl CacheKey {
  /// Key for the full collection of a resource.
  pub fn collection(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      id: None,
    }
  }

  /// Key for a single entity of a resource.
  pub fn detail(resource: impl Into<String>, id: i64) -> Self {
    Self {
      resource: resource.into(),
      id: Some(id),
    }
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn id(&self) -> Option<i64> {
    self.id
  }

  pub fn is_collection(&self) -> bool {
    self.id.is_none()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.id {
      Some(id) => write!(f, "{}/{}", self.resource, id),
      None => write!(f, "{}", self.resource),
    }
  }
}
