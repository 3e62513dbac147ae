//! Sideload SDK: relational tables exposed as REST resources with side-loaded relationships
//! and parent-table inheritance.

pub mod config;
pub mod error;
pub mod handlers;
pub mod inflect;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

pub use config::{introspect_columns, load_from_dir, resolve, FullConfig, ResolvedModel, ResourceType};
pub use error::{AppError, ConfigError, FieldErrors};
pub use query::{Executor, Record, Row};
pub use response::{Meta, ResponsePayload};
pub use routes::{app_router, common_routes, common_routes_with_ready, entity_routes};
pub use service::{RelationHook, RelationSelector, ResourceService, SearchRequest};
pub use settings::EngineSettings;
pub use sql::{MemoryExecutor, PgExecutor};
pub use state::AppState;
