//! HTTP query layer
//!
//! ## Endpoints
//!
//! - `GET /api/status?period=24h&provider=all&service=all` - status document
//!   per series with its bucketed timeline
//! - `GET /api/health` - storage health
//!
//! Status documents go through the response cache, so a burst of identical
//! requests costs a single storage scan.

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{Router, routing::get};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tokio_util::sync::CancellationToken;
#[cfg(feature = "api")]
use tracing::info;

/// Build the router with all routes and layers.
#[cfg(feature = "api")]
pub fn router(state: ApiState) -> Router {
    use tower::ServiceBuilder;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(routes::status::get_status))
        .route("/api/health", get(routes::health::health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task that drains when
/// `shutdown` is cancelled. Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", bind_addr);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(e) = server.await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
