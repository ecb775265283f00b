//! Prometheus exporter for the test report
//!
//! Every scrape renders the current report as a flat list of gauges in the
//! text exposition format.

use std::fmt::Write;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::model::Report;

use super::ApiState;

const NAMESPACE: &str = "stress_test";

/// Metrics listener configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub bind_addr: SocketAddr,

    /// Path serving the gauges, e.g. `/metrics`
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9132)),
            path: "/metrics".to_string(),
        }
    }
}

fn gauges(report: &Report) -> [(&'static str, &'static str, f64); 14] {
    [
        (
            "model_connected",
            "Count of connected models",
            report.connected_models as f64,
        ),
        (
            "clients_connected",
            "Count of connected clients",
            report.connected_clients as f64,
        ),
        (
            "failure_models",
            "Count of failures publisher connections",
            report.model_lag as f64,
        ),
        (
            "client_failures",
            "Count of failures clients connections",
            report.client_lag as f64,
        ),
        (
            "total_time",
            "Stress test total time",
            report.total_time_secs as f64,
        ),
        (
            "total_clients",
            "Total clients count",
            report.total_clients as f64,
        ),
        (
            "total_model_fps",
            "Average model fps",
            report.average_model_fps,
        ),
        (
            "total_client_fps",
            "Average client fps",
            report.average_client_fps,
        ),
        (
            "audio_bytes_sends",
            "Average audio KiB sent",
            report.average_audio_kib_sent,
        ),
        (
            "video_bytes_sends",
            "Average video KiB sent",
            report.average_video_kib_sent,
        ),
        (
            "audio_bytes_received",
            "Average audio KiB received",
            report.average_audio_kib_received,
        ),
        (
            "video_bytes_received",
            "Average video KiB received",
            report.average_video_kib_received,
        ),
        (
            "average_video_time_published",
            "Average video time published",
            report.average_publish_secs,
        ),
        (
            "average_video_time_received",
            "Average video time received",
            report.average_play_secs,
        ),
    ]
}

/// Render the report in Prometheus text exposition format.
pub fn render_metrics(report: &Report) -> String {
    let mut out = String::with_capacity(2048);

    for (name, help, value) in gauges(report) {
        let _ = writeln!(out, "# HELP {NAMESPACE}_{name} {help}");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_{name} gauge");
        let _ = writeln!(out, "{NAMESPACE}_{name} {value}");
    }

    out
}

async fn scrape(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.session.report().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(&report),
    )
}

fn landing_page(path: &str) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>RTMP stress test exporter</title></head>\n<body>\n\
         <h1>RTMP stress test exporter</h1>\n<p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n</html>\n"
    ))
}

/// Build the metrics router
pub fn metrics_router(state: ApiState, path: &str) -> Router {
    let page = landing_page(path);

    Router::new()
        .route("/", get(move || async move { page }))
        .route(path, get(scrape))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the metrics server in a background task.
pub async fn spawn_metrics_server(
    config: MetricsConfig,
    state: ApiState,
) -> anyhow::Result<SocketAddr> {
    let app = metrics_router(state, &config.path);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("metrics exporter listening on {}{}", addr, config.path);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server error: {}", e);
        }
    });

    Ok(addr)
}
