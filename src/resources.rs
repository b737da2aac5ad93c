//! Resource catalog: entity types and their typed API handles.
//!
//! The core is generic over resources; everything resource-specific lives
//! here. Each entity is a plain record with a server-assigned numeric id, a
//! create payload without the id, and an all-optional update payload merged
//! field by field.

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;

use crate::cache::CacheKey;
use crate::error::ApiError;
use crate::http::HttpClient;
use crate::mutation::MutationCoordinator;
use crate::query::{QueryClient, QueryResult};

/// A server-managed record the data layer can cache and mutate.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Payload for creates; the server assigns the id.
  type Create: Serialize + Clone + Send + Sync;
  /// Partial payload for updates.
  type Update: Serialize + Clone + Send + Sync;

  /// Path segment under the API root, e.g. "teachers".
  const RESOURCE: &'static str;

  fn id(&self) -> i64;

  /// Build the optimistic stand-in for a create with a locally assigned id.
  fn from_create(payload: &Self::Create, id: i64) -> Self;

  /// Merge a partial payload into this entity. Total and explicit: every
  /// field of the payload is either applied or left as-is, nothing is
  /// dropped or retyped.
  fn apply_update(&mut self, update: &Self::Update);
}

// ============================================================================
// Teacher
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
  pub id: i64,
  pub name: String,
  pub lastname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTeacher {
  pub name: String,
  pub lastname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTeacher {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lastname: Option<String>,
}

impl Entity for Teacher {
  type Create = CreateTeacher;
  type Update = UpdateTeacher;

  const RESOURCE: &'static str = "teachers";

  fn id(&self) -> i64 {
    self.id
  }

  fn from_create(payload: &Self::Create, id: i64) -> Self {
    Self {
      id,
      name: payload.name.clone(),
      lastname: payload.lastname.clone(),
    }
  }

  fn apply_update(&mut self, update: &Self::Update) {
    if let Some(name) = &update.name {
      self.name = name.clone();
    }
    if let Some(lastname) = &update.lastname {
      self.lastname = lastname.clone();
    }
  }
}

// ============================================================================
// Classroom
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
  pub id: i64,
  pub code: String,
  pub floor: i64,
  pub capacity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClassroom {
  pub code: String,
  pub floor: i64,
  pub capacity: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateClassroom {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub floor: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub capacity: Option<i64>,
}

impl Entity for Classroom {
  type Create = CreateClassroom;
  type Update = UpdateClassroom;

  const RESOURCE: &'static str = "classrooms";

  fn id(&self) -> i64 {
    self.id
  }

  fn from_create(payload: &Self::Create, id: i64) -> Self {
    Self {
      id,
      code: payload.code.clone(),
      floor: payload.floor,
      capacity: payload.capacity,
    }
  }

  fn apply_update(&mut self, update: &Self::Update) {
    if let Some(code) = &update.code {
      self.code = code.clone();
    }
    if let Some(floor) = update.floor {
      self.floor = floor;
    }
    if let Some(capacity) = update.capacity {
      self.capacity = capacity;
    }
  }
}

// ============================================================================
// Course
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
  pub id: i64,
  pub code: String,
  pub name: String,
  // Spelling matches the service's wire format
  pub abreviation: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
  pub id_teacher: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourse {
  pub code: String,
  pub name: String,
  pub abreviation: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
  pub id_teacher: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCourse {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub abreviation: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id_teacher: Option<i64>,
}

impl Entity for Course {
  type Create = CreateCourse;
  type Update = UpdateCourse;

  const RESOURCE: &'static str = "courses";

  fn id(&self) -> i64 {
    self.id
  }

  fn from_create(payload: &Self::Create, id: i64) -> Self {
    Self {
      id,
      code: payload.code.clone(),
      name: payload.name.clone(),
      abreviation: payload.abreviation.clone(),
      color: payload.color.clone(),
      id_teacher: payload.id_teacher,
    }
  }

  fn apply_update(&mut self, update: &Self::Update) {
    if let Some(code) = &update.code {
      self.code = code.clone();
    }
    if let Some(name) = &update.name {
      self.name = name.clone();
    }
    if let Some(abreviation) = &update.abreviation {
      self.abreviation = abreviation.clone();
    }
    if let Some(color) = &update.color {
      self.color = Some(color.clone());
    }
    if let Some(id_teacher) = update.id_teacher {
      self.id_teacher = id_teacher;
    }
  }
}

// ============================================================================
// Typed resource handle
// ============================================================================

/// Typed handle for one resource: cached reads plus optimistic writes over
/// the fixed paths `/{resource}` and `/{resource}/{id}`.
#[derive(Clone)]
pub struct Resource<E: Entity> {
  http: HttpClient,
  queries: QueryClient,
  mutations: MutationCoordinator,
  _entity: PhantomData<E>,
}

impl<E: Entity> Resource<E> {
  pub(crate) fn new(http: HttpClient, queries: QueryClient, mutations: MutationCoordinator) -> Self {
    Self {
      http,
      queries,
      mutations,
      _entity: PhantomData,
    }
  }

  /// Read the full collection, cache-first.
  pub async fn list(&self) -> QueryResult<Vec<E>> {
    let key = CacheKey::collection(E::RESOURCE);
    let http = self.http.clone();
    let path = format!("/{}", E::RESOURCE);
    self
      .queries
      .read(&key, move || {
        let http = http.clone();
        let path = path.clone();
        async move { http.request_value(Method::GET, &path, None::<&()>).await }
      })
      .await
  }

  /// Read one entity, cache-first. With `None` the read is disabled: no
  /// network access until an identifier is supplied.
  pub async fn get(&self, id: Option<i64>) -> QueryResult<E> {
    let key = id.map(|id| CacheKey::detail(E::RESOURCE, id));
    let http = self.http.clone();
    let path = id
      .map(|id| format!("/{}/{}", E::RESOURCE, id))
      .unwrap_or_default();
    self
      .queries
      .read_when(key, move || {
        let http = http.clone();
        let path = path.clone();
        async move { http.request_value(Method::GET, &path, None::<&()>).await }
      })
      .await
  }

  /// Create an entity with an optimistic collection append.
  pub async fn create(&self, payload: E::Create) -> Result<E, ApiError> {
    let path = format!("/{}", E::RESOURCE);
    let send = self.http.request_value(Method::POST, &path, Some(&payload));
    self.mutations.create::<E, _>(&payload, send).await
  }

  /// Update an entity with an optimistic merge into the cached collection
  /// member and detail slot.
  pub async fn update(&self, id: i64, payload: E::Update) -> Result<E, ApiError> {
    let path = format!("/{}/{}", E::RESOURCE, id);
    let send = self.http.request_value(Method::PUT, &path, Some(&payload));
    self.mutations.update::<E, _>(id, &payload, send).await
  }

  /// Delete an entity with an optimistic collection removal.
  pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
    let path = format!("/{}/{}", E::RESOURCE, id);
    let send = self.http.request_value(Method::DELETE, &path, None::<&()>);
    self.mutations.delete::<E, _>(id, send).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn apply_update_merges_only_present_fields() {
    let mut teacher = Teacher {
      id: 5,
      name: "X".into(),
      lastname: "Xi".into(),
    };
    teacher.apply_update(&UpdateTeacher {
      name: Some("Y".into()),
      ..Default::default()
    });
    assert_eq!(teacher.name, "Y");
    assert_eq!(teacher.lastname, "Xi");
  }

  #[test]
  fn from_create_carries_the_assigned_id() {
    let classroom = Classroom::from_create(
      &CreateClassroom {
        code: "B-12".into(),
        floor: 2,
        capacity: 30,
      },
      -3,
    );
    assert_eq!(classroom.id, -3);
    assert_eq!(classroom.code, "B-12");
  }

  #[test]
  fn course_wire_format_matches_the_service() {
    let course = Course {
      id: 1,
      code: "MAT".into(),
      name: "Mathematics".into(),
      abreviation: "MAT".into(),
      color: None,
      id_teacher: 4,
    };
    let value = serde_json::to_value(&course).expect("serialize");
    assert_eq!(value["abreviation"], "MAT");
    assert_eq!(value["id_teacher"], 4);
    // Optional color is omitted, not null
    assert!(value.get("color").is_none());

    let parsed: Course =
      serde_json::from_value(json!({
        "id": 1, "code": "MAT", "name": "Mathematics",
        "abreviation": "MAT", "id_teacher": 4
      }))
      .expect("deserialize");
    assert_eq!(parsed, course);
  }

  #[test]
  fn update_payload_serializes_only_present_fields() {
    let update = UpdateCourse {
      color: Some("#ff0000".into()),
      ..Default::default()
    };
    let value = serde_json::to_value(&update).expect("serialize");
    assert_eq!(value, json!({"color": "#ff0000"}));
  }
}
