//! Routers: common probes plus resource routes.

mod common;
mod entity;

pub use common::{common_routes, common_routes_with_ready};
pub use entity::entity_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this many bytes are rejected with 413.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Probes at the root, resources under `prefix` (e.g. `/api/v1`; empty or `/` mounts at the root).
pub fn app_router(state: AppState, prefix: &str) -> Router {
    let probes = common_routes_with_ready(state.clone());
    let resources = entity_routes(state);
    let router = match prefix.trim_end_matches('/') {
        "" => probes.merge(resources),
        prefix => probes.nest(prefix, resources),
    };
    router.layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
}
