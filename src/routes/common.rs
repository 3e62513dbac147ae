//! Probe routes: liveness, readiness with engine state, build version.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
}

/// What the engine is serving and how it resolves relationships.
#[derive(Serialize)]
struct Readiness {
    status: &'static str,
    resources: usize,
    relationships: usize,
    batch_has_many: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'static str>,
}

impl Readiness {
    fn of(state: &AppState) -> Self {
        let model = state.service.model();
        Readiness {
            status: "ok",
            resources: model.resources.len(),
            relationships: model.resources.iter().map(|r| r.relationships.len()).sum(),
            batch_has_many: state.service.settings().batch_has_many,
            database: None,
        }
    }
}

async fn health() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

/// 503 once the pool stops answering. Without a pool (in-memory executor) readiness is the model alone.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let mut body = Readiness::of(&state);
    let Some(pool) = &state.pool else {
        return (StatusCode::OK, Json(body));
    };
    match sqlx::query("SELECT 1").fetch_optional(pool).await {
        Ok(_) => {
            body.database = Some("ok");
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            body.status = "degraded";
            body.database = Some("unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(body))
        }
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /version. No state.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// [`common_routes`] plus GET /ready.
pub fn common_routes_with_ready(state: AppState) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .with_state(state)
        .merge(common_routes())
}
