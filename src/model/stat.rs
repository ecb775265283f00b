//! Per-client statistics snapshot

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ClientId;

/// Role of a simulated client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Pushes the source media to the server ("model")
    Publisher,
    /// Pulls a publisher's stream from the server ("client")
    Player,
}

/// Connection status code as reported by the RTMP connection.
///
/// The numeric codes follow the order in which an outbound connection
/// progresses; `CreateStreamOk` is the only status counted as "ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Closed,
    HandshakeOk,
    Connect,
    ConnectOk,
    CreateStream,
    CreateStreamOk,
    Error,
    /// No status reported yet
    Idle,
}

impl ConnectionStatus {
    const IDLE_CODE: u8 = u8::MAX;

    pub fn code(self) -> u8 {
        match self {
            ConnectionStatus::Closed => 0,
            ConnectionStatus::HandshakeOk => 1,
            ConnectionStatus::Connect => 2,
            ConnectionStatus::ConnectOk => 3,
            ConnectionStatus::CreateStream => 4,
            ConnectionStatus::CreateStreamOk => 5,
            ConnectionStatus::Error => 6,
            ConnectionStatus::Idle => Self::IDLE_CODE,
        }
    }

    /// Inverse of [`ConnectionStatus::code`]; unknown codes map to `Idle`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ConnectionStatus::Closed,
            1 => ConnectionStatus::HandshakeOk,
            2 => ConnectionStatus::Connect,
            3 => ConnectionStatus::ConnectOk,
            4 => ConnectionStatus::CreateStream,
            5 => ConnectionStatus::CreateStreamOk,
            6 => ConnectionStatus::Error,
            _ => ConnectionStatus::Idle,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ConnectionStatus::Closed => "Connection closed",
            ConnectionStatus::HandshakeOk => "Connection handshake OK",
            ConnectionStatus::Connect => "Connect",
            ConnectionStatus::ConnectOk => "Connect OK",
            ConnectionStatus::CreateStream => "Create stream",
            ConnectionStatus::CreateStreamOk => "Create stream OK",
            ConnectionStatus::Error => "Connection error",
            ConnectionStatus::Idle => "",
        }
    }

    /// Whether a client with this status takes part in report averages.
    pub fn is_ready(self) -> bool {
        self == ConnectionStatus::CreateStreamOk
    }
}

/// Point-in-time statistics of one client.
///
/// Always a copy: the aggregator builds these from the live counters and
/// hands them around by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatItem {
    pub role: Role,
    pub client_id: ClientId,
    pub status: ConnectionStatus,

    /// Human readable form of `status`
    pub status_description: String,

    pub stream_key: String,
    pub audio_bytes: u64,
    pub video_bytes: u64,

    /// Seconds from the connect command to the first audio byte
    pub audio_startup_secs: u64,

    /// Seconds from the connect command to the first video byte
    pub video_startup_secs: u64,

    /// Seconds since media started flowing
    pub total_time_secs: u64,

    /// Video frames during the last aggregator tick
    pub fps: u64,

    pub total_frames: u64,

    /// Players watching this publisher's stream key (publishers only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub receivers: BTreeMap<ClientId, StatItem>,
}

impl StatItem {
    pub fn new(role: Role, client_id: ClientId, stream_key: impl Into<String>) -> Self {
        Self {
            role,
            client_id,
            status: ConnectionStatus::Idle,
            status_description: ConnectionStatus::Idle.description().to_string(),
            stream_key: stream_key.into(),
            audio_bytes: 0,
            video_bytes: 0,
            audio_startup_secs: 0,
            video_startup_secs: 0,
            total_time_secs: 0,
            fps: 0,
            total_frames: 0,
            receivers: BTreeMap::new(),
        }
    }

    /// Ready status and media actually flowing.
    pub fn is_active(&self) -> bool {
        self.status.is_ready() && self.fps > 0
    }
}
