//! Test session
//!
//! One [`TestSession`] lives for the whole process and is shared by every
//! control surface (HTTP API, metrics exporter, startup plan). It holds at
//! most one running launcher and the report of the current run.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::actors::{ClientSummary, LauncherHandle};
use crate::media::{MediaError, MediaOpener};
use crate::model::{Report, SharedReport, StartRequest, TestStatus};
use crate::rtmp::{RtmpConnector, RtmpUrl};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a test is already running")]
    AlreadyRunning,

    #[error("invalid start request: {0}")]
    InvalidRequest(String),

    #[error("failed to open media source: {0}")]
    Media(#[from] MediaError),
}

pub struct TestSession {
    connector: Arc<dyn RtmpConnector>,
    media: Arc<dyn MediaOpener>,
    report: SharedReport,

    /// Used when a start request carries no server
    default_server: Option<String>,

    launcher: Mutex<Option<LauncherHandle>>,
}

impl TestSession {
    pub fn new(
        connector: Arc<dyn RtmpConnector>,
        media: Arc<dyn MediaOpener>,
        default_server: Option<String>,
    ) -> Self {
        Self {
            connector,
            media,
            report: SharedReport::new(),
            default_server: default_server.filter(|server| !server.trim().is_empty()),
            launcher: Mutex::new(None),
        }
    }

    pub fn default_server(&self) -> Option<&str> {
        self.default_server.as_deref()
    }

    pub fn shared_report(&self) -> &SharedReport {
        &self.report
    }

    /// Start a test run and return its id.
    ///
    /// Rejected without touching the current state when a run is active
    /// or the request is malformed.
    pub async fn start(&self, mut request: StartRequest) -> Result<String, SessionError> {
        let mut launcher = self.launcher.lock().await;
        if launcher.as_ref().is_some_and(LauncherHandle::is_running) {
            return Err(SessionError::AlreadyRunning);
        }

        if request.server_url.trim().is_empty() {
            request.server_url = self
                .default_server
                .clone()
                .ok_or_else(|| SessionError::InvalidRequest("server url is required".into()))?;
        }
        RtmpUrl::parse(&request.server_url)
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        if request.model_count == 0 {
            return Err(SessionError::InvalidRequest(
                "model_count must be at least 1".into(),
            ));
        }
        if total_clients(request.model_count, request.client_count).is_none() {
            return Err(SessionError::InvalidRequest(format!(
                "{} models with {} clients each is too many",
                request.model_count, request.client_count
            )));
        }

        let source = self.media.open().await?;

        let test_id = uuid::Uuid::new_v4().to_string();
        self.report
            .reset(test_id.clone(), request.model_count, request.client_count)
            .await;

        info!(
            test_id = %test_id,
            server = %request.server_url,
            models = request.model_count,
            clients = request.client_count,
            "starting test"
        );
        *launcher = Some(LauncherHandle::spawn(
            request,
            self.connector.clone(),
            source,
            self.report.clone(),
        ));

        Ok(test_id)
    }

    /// Stop the active run, if any, and reset the report.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let launcher = self.launcher.lock().await.take();
        if let Some(launcher) = launcher {
            info!("stopping test");
            launcher.stop().await?;
        }

        self.report.reset("", 0, 0).await;
        Ok(())
    }

    pub async fn status(&self) -> TestStatus {
        match self.launcher.lock().await.as_ref() {
            None => TestStatus::Ready,
            Some(launcher) if launcher.is_running() => TestStatus::Running,
            Some(_) => TestStatus::Error,
        }
    }

    pub async fn report(&self) -> Report {
        self.report.snapshot().await
    }

    /// Routing table of the active run; empty when idle.
    pub async fn clients(&self) -> anyhow::Result<Vec<ClientSummary>> {
        let launcher = self.launcher.lock().await.clone();
        match launcher {
            Some(launcher) if launcher.is_running() => launcher.clients().await,
            _ => Ok(Vec::new()),
        }
    }

    /// Refresh the report now instead of on the next aggregator tick.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let launcher = self.launcher.lock().await.clone();
        if let Some(launcher) = launcher
            && let Err(e) = launcher.tick_now().await
        {
            warn!("failed to refresh report: {e:#}");
        }
        Ok(())
    }
}

/// Publishers plus players of a run, if it fits the report's counters.
fn total_clients(model_count: usize, client_count: usize) -> Option<usize> {
    model_count
        .checked_mul(client_count)
        .and_then(|players| players.checked_add(model_count))
        .filter(|total| i64::try_from(*total).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaSource;
    use crate::rtmp::{RtmpConnection, RtmpError, RtmpEventHandler};
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    /// Neither dials nor opens anything.
    struct Unreachable;

    #[async_trait]
    impl RtmpConnector for Unreachable {
        async fn dial(
            &self,
            _url: &str,
            _handler: Arc<dyn RtmpEventHandler>,
        ) -> crate::rtmp::Result<Box<dyn RtmpConnection>> {
            Err(RtmpError::Closed)
        }
    }

    #[async_trait]
    impl MediaOpener for Unreachable {
        async fn open(&self) -> crate::media::Result<Box<dyn MediaSource>> {
            Err(MediaError::Closed)
        }
    }

    fn session(default_server: Option<&str>) -> TestSession {
        TestSession::new(
            Arc::new(Unreachable),
            Arc::new(Unreachable),
            default_server.map(str::to_string),
        )
    }

    fn request(server: &str, models: usize) -> StartRequest {
        StartRequest {
            server_url: server.to_string(),
            model_count: models,
            client_count: 1,
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_server() {
        let session = session(None);
        assert_matches!(
            session.start(request("", 1)).await,
            Err(SessionError::InvalidRequest(_))
        );
        assert_eq!(session.status().await, TestStatus::Ready);
    }

    #[tokio::test]
    async fn test_rejects_bad_url_and_zero_models() {
        let session = session(Some("rtmp://localhost/live"));
        assert_matches!(
            session.start(request("http://localhost", 1)).await,
            Err(SessionError::InvalidRequest(_))
        );
        assert_matches!(
            session.start(request("", 0)).await,
            Err(SessionError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn test_rejects_counts_that_overflow() {
        let session = session(Some("rtmp://localhost/live"));
        let huge = StartRequest {
            server_url: String::new(),
            model_count: 1 << 33,
            client_count: 1 << 33,
        };
        assert_matches!(
            session.start(huge).await,
            Err(SessionError::InvalidRequest(_))
        );

        let wide = StartRequest {
            server_url: String::new(),
            model_count: usize::MAX,
            client_count: 0,
        };
        assert_matches!(
            session.start(wide).await,
            Err(SessionError::InvalidRequest(_))
        );

        assert_eq!(session.status().await, TestStatus::Ready);
        assert_eq!(session.report().await.requested_models, 0);
    }

    #[test]
    fn test_total_clients() {
        assert_eq!(total_clients(2, 3), Some(8));
        assert_eq!(total_clients(1, 0), Some(1));
        assert_eq!(total_clients(usize::MAX, 2), None);
        assert_eq!(total_clients(usize::MAX, 0), None);
    }

    #[tokio::test]
    async fn test_media_failure_leaves_session_ready() {
        let session = session(Some("rtmp://localhost/live"));
        assert_matches!(
            session.start(request("", 1)).await,
            Err(SessionError::Media(_))
        );
        assert_eq!(session.status().await, TestStatus::Ready);
        assert_eq!(session.report().await.test_id, "");
    }

    #[tokio::test]
    async fn test_stop_when_idle_resets_report() {
        let session = session(None);
        session.stop().await.unwrap();
        session.stop().await.unwrap();

        let report = session.report().await;
        assert_eq!(report.test_id, "");
        assert_eq!(report.requested_models, 0);
        assert_eq!(report.requested_clients, 0);
    }

    #[test]
    fn test_blank_default_server_is_ignored() {
        assert_eq!(session(Some("  ")).default_server(), None);
    }
}
