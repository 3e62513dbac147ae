//! Shared application state for all routes.

use crate::service::ResourceService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ResourceService>,
    /// Pool for the readiness probe; absent when running on the in-memory executor.
    pub pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(service: ResourceService) -> Self {
        AppState {
            service: Arc::new(service),
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: sqlx::PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
