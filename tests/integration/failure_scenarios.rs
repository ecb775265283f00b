//! Test runs against a misbehaving server or media source

use std::sync::Arc;
use std::time::Duration;

use rtmp_stress::{
    actors::{ActorState, LauncherHandle},
    model::{ConnectionStatus, Role, SharedReport, TestStatus},
};

use crate::helpers::*;

#[tokio::test]
async fn test_refused_dial_fails_publishers_without_players() {
    let connector = MockConnector::refusing();
    let session = session_with(&connector);

    session.start(request(2, 3)).await.unwrap();

    let session_ref = &session;
    eventually("every publisher to fail", move || async move {
        let clients = session_ref.clients().await.unwrap();
        clients.len() == 2 && clients.iter().all(|c| c.state == ActorState::Failed)
    })
    .await;

    let clients = session.clients().await.unwrap();
    assert!(clients.iter().all(|c| c.role == Role::Publisher));
    assert!(clients.iter().all(|c| c.status == ConnectionStatus::Error));

    // failed clients do not bring the run down
    assert_eq!(session.status().await, TestStatus::Running);

    session.refresh().await.unwrap();
    let report = session.report().await;
    assert_eq!(report.connected_models, 0);
    assert_eq!(report.connected_clients, 0);
    assert_eq!(report.model_lag, 2);
    assert_eq!(report.client_lag, 6);
    assert_eq!(report.average_model_fps, 0.0);

    session.stop().await.unwrap();
    assert_eq!(connector.dials(), 2);
}

#[tokio::test]
async fn test_stop_while_dialing() {
    let connector = MockConnector::hanging();
    let session = session_with(&connector);

    session.start(request(3, 1)).await.unwrap();

    let connector_ref = &connector;
    eventually("every publisher to dial", move || async move {
        connector_ref.dials() == 3
    })
    .await;

    tokio::time::timeout(Duration::from_secs(2), session.stop())
        .await
        .expect("stop should not wait on pending dials")
        .unwrap();

    assert_eq!(session.status().await, TestStatus::Ready);
    assert_eq!(connector.plays(), 0);
}

#[tokio::test]
async fn test_dropped_publisher_stays_in_routing_table() {
    let connector = MockConnector::dropping_publishers();
    let launcher = LauncherHandle::spawn(
        request(1, 2),
        Arc::new(connector.clone()),
        LoopingSource::boxed(),
        SharedReport::new(),
    );

    let launcher_ref = &launcher;
    eventually("the publisher to be closed", move || async move {
        launcher_ref
            .clients()
            .await
            .unwrap()
            .iter()
            .any(|c| c.role == Role::Publisher && c.state == ActorState::Closed)
    })
    .await;

    let clients = launcher.clients().await.unwrap();
    assert_eq!(clients.len(), 3);
    assert_eq!(clients.iter().filter(|c| c.role == Role::Player).count(), 2);
    assert!(launcher.is_running());

    launcher.stop().await.unwrap();
    assert!(!launcher.is_running());
}

#[tokio::test]
async fn test_broken_media_leaves_publishers_idle() {
    let connector = MockConnector::healthy();
    let report = SharedReport::new();
    let launcher = LauncherHandle::spawn(
        request(2, 1),
        Arc::new(connector.clone()),
        Box::new(BrokenSource),
        report.clone(),
    );

    let launcher_ref = &launcher;
    eventually("both publishers to go live", move || async move {
        let clients = launcher_ref.clients().await.unwrap();
        clients
            .iter()
            .filter(|c| c.role == Role::Publisher && c.state == ActorState::Publishing)
            .count()
            == 2
    })
    .await;

    launcher.tick_now().await.unwrap();
    assert_eq!(report.snapshot().await.connected_models, 0);
    assert_eq!(connector.frames_published(), 0);

    launcher.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let connector = MockConnector::healthy();
    let launcher = LauncherHandle::spawn(
        request(1, 1),
        Arc::new(connector.clone()),
        LoopingSource::boxed(),
        SharedReport::new(),
    );

    launcher.stop().await.unwrap();
    launcher.stop().await.unwrap();
    assert!(!launcher.is_running());
    assert!(launcher.clients().await.is_err());
}
