//! Control-plane value objects

use serde::{Deserialize, Serialize};

/// Parameters of a test run, as submitted to `POST /start_test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// RTMP server URL, e.g. `rtmp://localhost:1935/live`; empty means
    /// the configured default
    #[serde(rename = "server", default)]
    pub server_url: String,

    /// Number of simulated publishers
    pub model_count: usize,

    /// Number of simulated players per publisher
    pub client_count: usize,
}

/// Test state reported by `GET /status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Ready = 0,
    Running = 1,
    Error = 2,
}

impl TestStatus {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            TestStatus::Ready => "Test ready. Click start for starts this.",
            TestStatus::Running => "Test running. Click stop for stops this.",
            TestStatus::Error => "Test error.Ups! Something wrong...",
        }
    }
}

/// JSON body returned by every control endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: u8,
    pub description: String,
}

impl From<TestStatus> for StatusResponse {
    fn from(status: TestStatus) -> Self {
        Self {
            id: status.id(),
            description: status.description().to_string(),
        }
    }
}
