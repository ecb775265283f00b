//! Integration tests for the control API and the metrics exporter

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use rtmp_stress::{
    api::{ApiConfig, ApiState, MetricsConfig, spawn_api_server, spawn_metrics_server},
    model::{Report, StatusResponse},
    session::TestSession,
};
use serde_json::Value;

use crate::helpers::*;

async fn spawn_test_api(session: Arc<TestSession>) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    spawn_api_server(config, ApiState::new(session)).await.unwrap()
}

async fn spawn_test_metrics(session: Arc<TestSession>) -> SocketAddr {
    let config = MetricsConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        path: "/metrics".to_string(),
    };

    spawn_metrics_server(config, ApiState::new(session))
        .await
        .unwrap()
}

async fn post_start(
    client: &reqwest::Client,
    addr: SocketAddr,
    form: &[(&str, &str)],
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/start_test"))
        .form(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_status_when_idle() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session).await;

    let response = reqwest::get(format!("http://{addr}/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: StatusResponse = response.json().await.unwrap();
    assert_eq!(body.id, 0);
    assert!(body.description.starts_with("Test ready"));
}

#[tokio::test]
async fn test_start_and_stop_cycle() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session).await;
    let client = reqwest::Client::new();

    let response = post_start(
        &client,
        addr,
        &[
            ("server", SERVER),
            ("model_count", "1"),
            ("client_count", "2"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: StatusResponse = response.json().await.unwrap();
    assert_eq!(body.id, 1);

    let status: StatusResponse = reqwest::get(format!("http://{addr}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.id, 1);

    let report: Report = reqwest::get(format!("http://{addr}/report"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report.requested_models, 1);
    assert_eq!(report.requested_clients, 2);
    assert!(!report.test_id.is_empty());

    let client_ref = &client;
    eventually("players to be listed", move || async move {
        let clients: Vec<Value> = client_ref
            .get(format!("http://{addr}/clients"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        clients.len() == 3
    })
    .await;

    let response = client
        .post(format!("http://{addr}/stop_test"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: StatusResponse = response.json().await.unwrap();
    assert_eq!(body.id, 0);

    let report: Report = reqwest::get(format!("http://{addr}/report"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report.test_id, "");
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session.clone()).await;
    let client = reqwest::Client::new();

    let form = [("model_count", "1"), ("client_count", "1")];
    assert_eq!(post_start(&client, addr, &form).await.status(), StatusCode::OK);

    let response = post_start(&client, addr, &form).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: StatusResponse = response.json().await.unwrap();
    assert_eq!(body.id, 2);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_start_rejected() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session.clone()).await;
    let client = reqwest::Client::new();

    let response = post_start(&client, addr, &[("model_count", "many")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_start(
        &client,
        addr,
        &[
            ("server", "http://127.0.0.1/live"),
            ("model_count", "1"),
            ("client_count", "1"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_start(&client, addr, &[("model_count", "0"), ("client_count", "1")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(session.status().await.id(), 0);
}

#[tokio::test]
async fn test_oversized_start_rejected() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session.clone()).await;
    let client = reqwest::Client::new();

    let response = post_start(
        &client,
        addr,
        &[("model_count", "8589934592"), ("client_count", "8589934592")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: StatusResponse = response.json().await.unwrap();
    assert_eq!(body.id, 2);

    assert_eq!(session.status().await.id(), 0);
    assert_eq!(session.report().await.requested_models, 0);
}

#[tokio::test]
async fn test_stop_when_idle_succeeds() {
    let session = session_with(&MockConnector::healthy());
    let addr = spawn_test_api(session).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/stop_test"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exporter() {
    let session = session_with(&MockConnector::healthy());
    session.start(request(2, 1)).await.unwrap();
    let addr = spawn_test_metrics(session.clone()).await;

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("# TYPE stress_test_model_connected gauge"));
    assert!(body.contains("stress_test_total_clients 4"));

    let landing = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(landing.contains("href=\"/metrics\""));

    session.stop().await.unwrap();
}
