use std::sync::Arc;

use anyhow::Context;

use lead_form::api::{self, AppState};
use lead_form::config::AppConfig;
use lead_form::enrichment::{EnrichmentProvider, SimulatedEnrichment};
use lead_form::form::FormOrchestrator;
use lead_form::session::{SessionStore, spawn_sweep_task};
use lead_form::store::{Database, LibSqlBackend};
use lead_form::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = telemetry::init(&config.log)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        db = %config.db_path.display(),
        session_ttl_secs = config.session_ttl.as_secs(),
        "Starting lead form service"
    );

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("opening database")?,
    );

    let ttl = chrono::Duration::from_std(config.session_ttl)
        .context("LEAD_FORM_SESSION_TTL_SECS is out of range")?;
    let sessions = SessionStore::new(Arc::clone(&db), ttl);
    let enrichment: Arc<dyn EnrichmentProvider> =
        Arc::new(SimulatedEnrichment::new(config.enrichment.clone()));
    let orchestrator = FormOrchestrator::new(sessions.clone(), Arc::clone(&db), enrichment);

    let sweep = spawn_sweep_task(sessions, config.sweep_interval);

    let app = api::router(AppState { orchestrator }, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweep.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
