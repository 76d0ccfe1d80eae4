//! trainboard-server: Axum web server with REST API and SSE live streaming.

pub mod api;
pub mod state;

use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use state::AppState;
pub use trainboard_core::DashboardConfig;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api::router())
        .with_state(state)
        .layer(cors)
}

/// Start the server on the configured address.
pub async fn serve(config: DashboardConfig) -> anyhow::Result<()> {
    serve_with_state(AppState::new(config)).await
}

pub async fn serve_with_state(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    info!(data_dir = %state.config.data_dir.display(), "trainboard at http://{}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
