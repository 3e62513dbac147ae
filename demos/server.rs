//! Example server: loads resource config from CONFIG_PATH, fills column metadata from the
//! database, mounts probes and resource routes.

use sideload_sdk::{
    app_router,
    introspect_columns,
    load_from_dir,
    resolve,
    AppState,
    EngineSettings,
    PgExecutor,
    ResourceService,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sideload_sdk=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/sideload".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let config_source = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "sample".into());
    let mut config = load_from_dir(&config_source).await?;
    introspect_columns(&pool, &mut config).await?;
    let model = resolve(&config)?;
    tracing::info!(resources = model.resources.len(), "model resolved");

    let service = ResourceService::new(
        Arc::new(model),
        Arc::new(PgExecutor::new(pool.clone())),
        EngineSettings::from_env(),
    );
    let state = AppState::new(service).with_pool(pool);
    let app = app_router(state, "/api/v1");

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
