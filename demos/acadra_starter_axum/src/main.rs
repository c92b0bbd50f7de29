use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::{Json, Router};
use tracing_subscriber::EnvFilter;

use acadra_engine::{seed_default_rules, SqliteAcademicStore, StorageConfig};
use acadra_server::{build_router, AcademicApiState};

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,acadra_engine=info,acadra_server=info")),
        )
        .init();

    let config = StorageConfig::from_env();
    config
        .startup_health_check()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let addr = std::env::var("ACADRA_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());

    let store = Arc::new(
        SqliteAcademicStore::new(&config.sqlite_db_path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    if config.seed_catalog {
        seed_default_rules(store.as_ref()).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }
    let state = AcademicApiState::with_sqlite_idempotency(store, &config.sqlite_db_path);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let app = Router::new()
        .route("/healthz", get(healthz))
        .merge(build_router(state));

    tracing::info!("acadra starter server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
