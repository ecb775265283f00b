//! Full test runs against a healthy scripted server

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rtmp_stress::{
    actors::{ActorState, ClientSummary, LauncherHandle},
    model::{Role, SharedReport, TestStatus},
    session::SessionError,
};

use crate::helpers::*;

fn players_per_stream(clients: &[ClientSummary]) -> BTreeMap<String, usize> {
    let mut per_stream = BTreeMap::new();
    for client in clients.iter().filter(|c| c.role == Role::Player) {
        *per_stream.entry(client.stream_key.clone()).or_insert(0) += 1;
    }
    per_stream
}

#[tokio::test]
async fn test_players_follow_each_live_publisher() {
    let connector = MockConnector::healthy();
    let launcher = LauncherHandle::spawn(
        request(2, 3),
        std::sync::Arc::new(connector.clone()),
        LoopingSource::boxed(),
        SharedReport::new(),
    );

    let launcher = &launcher;
    eventually("every player to be playing", move || async move {
        let clients = launcher.clients().await.unwrap();
        clients.len() == 8
            && clients.iter().all(|c| match c.role {
                Role::Publisher => c.state == ActorState::Publishing,
                Role::Player => c.state == ActorState::Playing,
            })
    })
    .await;

    let clients = launcher.clients().await.unwrap();
    let publishers: Vec<_> = clients
        .iter()
        .filter(|c| c.role == Role::Publisher)
        .map(|c| c.stream_key.as_str())
        .collect();
    assert_eq!(publishers, vec!["model1", "model2"]);
    assert_eq!(
        players_per_stream(&clients),
        BTreeMap::from([("model1".to_string(), 3), ("model2".to_string(), 3)])
    );

    assert_eq!(connector.dials(), 8);
    assert_eq!(connector.publishes(), 2);
    assert_eq!(connector.plays(), 6);

    launcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_frames_reach_every_publisher() {
    let connector = MockConnector::healthy();
    let launcher = LauncherHandle::spawn(
        request(3, 0),
        std::sync::Arc::new(connector.clone()),
        LoopingSource::boxed(),
        SharedReport::new(),
    );

    let connector_ref = &connector;
    eventually("frames to be published", move || async move {
        connector_ref.frames_published() >= 30
    })
    .await;

    let clients = launcher.clients().await.unwrap();
    assert_eq!(clients.len(), 3);
    assert!(clients.iter().all(|c| c.role == Role::Publisher));

    launcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_report_counts_active_clients() {
    let connector = MockConnector::healthy();
    let session = session_with(&connector);

    let test_id = session.start(request(2, 3)).await.unwrap();
    assert_eq!(session.status().await, TestStatus::Running);

    let report = session.report().await;
    assert_eq!(report.test_id, test_id);
    assert_eq!(report.requested_models, 2);
    assert_eq!(report.requested_clients, 6);
    assert_eq!(report.total_clients, 8);

    // a forced tick can land between two frames, so judge one snapshot at a time
    let session_ref = &session;
    eventually("every client to be counted", move || async move {
        session_ref.refresh().await.unwrap();
        let report = session_ref.report().await;
        report.connected_models == 2
            && report.connected_clients == 6
            && report.model_lag == 0
            && report.client_lag == 0
            && report.average_model_fps > 0.0
            && report.average_client_fps > 0.0
            && report.average_video_kib_sent > 0.0
            && report.average_video_kib_received > 0.0
    })
    .await;

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_resets_report_and_releases_clients() {
    let connector = MockConnector::healthy();
    let session = session_with(&connector);

    session.start(request(1, 2)).await.unwrap();
    let session_ref = &session;
    eventually("the run to be fully connected", move || async move {
        session_ref.clients().await.unwrap().len() == 3
    })
    .await;

    session.stop().await.unwrap();

    assert_eq!(session.status().await, TestStatus::Ready);
    assert!(session.clients().await.unwrap().is_empty());

    let report = session.report().await;
    assert_eq!(report.test_id, "");
    assert_eq!(report.requested_models, 0);
    assert_eq!(report.connected_models, 0);
    assert_eq!(report.connected_clients, 0);

    let connector_ref = &connector;
    eventually("every connection to be closed", move || async move {
        connector_ref.closes() == 3
    })
    .await;

    // stopping again is a no-op
    session.stop().await.unwrap();
    assert_eq!(session.status().await, TestStatus::Ready);
}

#[tokio::test]
async fn test_report_stays_reset_after_stop() {
    let connector = MockConnector::healthy();
    let session = session_with(&connector);

    session.start(request(2, 2)).await.unwrap();
    let session_ref = &session;
    eventually("publishers and players to move frames", move || async move {
        session_ref.refresh().await.unwrap();
        let report = session_ref.report().await;
        report.connected_models == 2 && report.connected_clients == 4
    })
    .await;

    session.stop().await.unwrap();

    // outlast the aggregator period
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let report = session.report().await;
    assert_eq!(report.test_id, "");
    assert_eq!(report.connected_models, 0);
    assert_eq!(report.connected_clients, 0);
    assert_eq!(report.model_lag, 0);
    assert_eq!(report.client_lag, 0);
}

#[tokio::test]
async fn test_only_one_run_at_a_time() {
    let connector = MockConnector::healthy();
    let session = session_with(&connector);

    let first = session.start(request(1, 1)).await.unwrap();
    assert_matches!(
        session.start(request(1, 1)).await,
        Err(SessionError::AlreadyRunning)
    );
    assert_eq!(session.report().await.test_id, first);

    session.stop().await.unwrap();

    let second = session.start(request(2, 0)).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(session.report().await.requested_models, 2);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_falls_back_to_default_server() {
    let connector = MockConnector::healthy();
    let session = session_with(&connector);

    let mut request = request(1, 0);
    request.server_url = String::new();
    session.start(request).await.unwrap();

    let connector_ref = &connector;
    eventually("the publisher to dial", move || async move {
        connector_ref.dials() == 1
    })
    .await;

    session.stop().await.unwrap();
}
