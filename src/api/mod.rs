//! HTTP control API and metrics exporter
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **TestSession** shared by every handler through [`ApiState`]
//! - **Prometheus** text exposition rendered straight from the report
//!
//! ## Endpoints
//!
//! Control listener:
//!
//! - `POST /start_test` - Start a run (form: `server`, `model_count`, `client_count`)
//! - `POST /stop_test` - Stop the run and reset the report
//! - `GET /status` - `{id, description}` of the current state
//! - `GET /report` - Current report as JSON
//! - `GET /clients` - Routing table of the current run
//!
//! Metrics listener:
//!
//! - `GET /` - Landing page
//! - `GET <telemetry path>` - Report gauges

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use metrics::{MetricsConfig, spawn_metrics_server};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8083")
    pub bind_addr: SocketAddr,

    /// Send permissive CORS headers
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8083)),
            enable_cors: true,
        }
    }
}

pub(crate) fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the control router
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    let app = Router::new()
        .route("/start_test", post(routes::control::start_test))
        .route("/stop_test", post(routes::control::stop_test))
        .route("/status", get(routes::control::get_status))
        .route("/clients", get(routes::control::list_clients))
        .route("/report", get(routes::report::get_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(permissive_cors())
    } else {
        app
    }
}

/// Spawn the control API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
