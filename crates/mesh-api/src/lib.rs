pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().nest("/api", routes(state)).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run `serve` in the background. The API is an optional side surface: if
/// it cannot start or stops, the error is logged and the daemon keeps going.
pub fn spawn(state: ApiState, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(state, port).await {
            tracing::error!(port, error = %e, "status API unavailable, continuing without it");
        }
    })
}

fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/members", get(handlers::handle_members))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state)
}
