//! HTTP server setup.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::{Gateway, LlmClient, OpenAiClient};
use crate::task::Orchestrator;
use crate::template::{SharedTemplateStore, TemplateStore};

use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    /// Judge template store
    pub templates: SharedTemplateStore,
    /// Owns the task table and the evaluation workers
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Wire the gateway and orchestrator around `client`. Spawns the
    /// evaluation workers, so it must run inside a tokio runtime.
    pub fn new(
        config: &Config,
        templates: SharedTemplateStore,
        client: Arc<dyn LlmClient>,
    ) -> Arc<Self> {
        let gateway = Arc::new(Gateway::new(client, config.retry_config()));
        let orchestrator = Orchestrator::start(
            config.orchestrator_config(),
            Arc::clone(&templates),
            gateway,
        );
        Arc::new(Self {
            templates,
            orchestrator,
        })
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/v1/evaluate", super::evaluate::routes())
        .nest("/v1/config/judge_templates", super::templates::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let templates = Arc::new(TemplateStore::open(config.templates_path.clone()).await?);

    let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
        config.backend.base_url.clone(),
        config.backend.api_key.clone(),
        config.backend.timeout,
    ));
    tracing::info!("Judge backend: {}", config.backend.base_url);

    let state = AppState::new(&config, templates, client);
    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.orchestrator.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping evaluation workers...");
}

/// Health check endpoint.
async fn health(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
