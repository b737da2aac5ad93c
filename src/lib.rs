//! Client-side data layer for the Aula scheduling API.
//!
//! Keeps an in-memory cache of remote entities synchronized with the backing
//! service while letting callers observe writes before the network confirms
//! them:
//!
//! - reads are cache-first, deduplicated per key, and degrade to stale data
//!   plus an error flag when the network fails;
//! - writes apply optimistically, roll back exactly on failure, and always
//!   settle by invalidating the keys they touched.
//!
//! # Example
//!
//! ```ignore
//! let client = AulaClient::new(&Config::load(None)?)?;
//! let teachers = client.resource::<Teacher>();
//!
//! let listing = teachers.list().await;
//! teachers.create(CreateTeacher { name: "Ada".into(), lastname: "L".into() }).await?;
//! // Readers already see the new teacher under a temporary id; the next
//! // list() refetches the authoritative collection.
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mutation;
pub mod query;
pub mod resources;

pub use cache::{CacheEntry, CacheKey, CacheStore, EntryState};
pub use client::AulaClient;
pub use config::{Config, ConfigError};
pub use error::{ApiError, ErrorKind};
pub use http::HttpClient;
pub use mutation::{MutationCoordinator, MutationState};
pub use query::{QueryClient, QueryResult, QueryStatus};
pub use resources::{
  Classroom, Course, CreateClassroom, CreateCourse, CreateTeacher, Entity, Resource, Teacher,
  UpdateClassroom, UpdateCourse, UpdateTeacher,
};
