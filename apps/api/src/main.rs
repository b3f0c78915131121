mod catalog;
mod config;
mod dialogue;
mod errors;
mod evaluation;
mod knowledge;
mod oracle;
mod routes;
mod session;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::catalog::CatalogIndex;
use crate::config::Config;
use crate::dialogue::DialogueController;
use crate::evaluation::EvaluationService;
use crate::knowledge::KnowledgeStore;
use crate::oracle::OracleAdapter;
use crate::routes::build_router;
use crate::session::SessionStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wi-interview-api v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(CatalogIndex::load(&config.data_dir));
    info!("Catalog index loaded from {:?}", catalog.path());

    let knowledge = Arc::new(KnowledgeStore::new(catalog.clone(), &config.data_dir));
    let sessions = Arc::new(SessionStore::load(&config.data_dir));

    let oracle = Arc::new(OracleAdapter::new(
        config.oracle_api_key.clone(),
        config.oracle_model.clone(),
        config.oracle_fallback_model.clone(),
        config.oracle_timeout_secs,
        &config.data_dir,
    ));
    info!("Oracle adapter initialized (model: {})", config.oracle_model);

    let dialogue = Arc::new(DialogueController::new(
        catalog.clone(),
        knowledge.clone(),
        oracle.clone(),
        config.max_in_tl_rounds,
    ));
    let evaluation = Arc::new(EvaluationService::new(catalog.clone(), oracle.clone(), &config.data_dir));

    // Build app state
    let state = AppState {
        catalog,
        knowledge,
        sessions,
        oracle,
        dialogue,
        evaluation,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS once a real deployment target is known

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
