//! Web server module.

mod handlers;

pub use handlers::*;

use crate::catalog::Server as CatalogServer;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::BatchScheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub scheduler: BatchScheduler,
    pub catalog: Arc<Vec<CatalogServer>>,
    /// Client for status-aware server-side checks.
    pub http: reqwest::Client,
    /// Parent of every request-triggered batch's cancellation token.
    pub shutdown: CancellationToken,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/health", get(handlers::handle_health))
        .route(
            "/api/servers",
            get(handlers::handle_get_servers).post(handlers::handle_suggest_server),
        )
        .route(
            "/api/test",
            get(handlers::handle_test_info).post(handlers::handle_test_urls),
        )
        .route("/api/check", get(handlers::handle_check_catalog))
        .route("/api/check-server", get(handlers::handle_check_server))
        .route("/api/speed-test", get(handlers::handle_speed_test))
        .route("/api/history", get(handlers::handle_get_history))
        .route("/api/history/{id}", get(handlers::handle_get_run))
        .route("/api/analytics", get(handlers::handle_analytics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// Web server for bdix-probe.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve on the configured port until the shutdown token is cancelled.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = router(self.state.clone());
        let shutdown = self.state.shutdown.clone();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
