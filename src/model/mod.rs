//! Shared data model
//!
//! Plain value types exchanged between the actors, the aggregator and the
//! control plane. Nothing in here owns a task or a channel.

pub mod frame;
pub mod report;
pub mod request;
pub mod stat;

pub use frame::{MediaFrame, TagType};
pub use report::{Report, SharedReport};
pub use request::{StartRequest, StatusResponse, TestStatus};
pub use stat::{ConnectionStatus, Role, StatItem};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a simulated client, used as the routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh, unique identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stream key used by the n-th publisher (1-based).
pub fn model_stream_key(index: usize) -> String {
    format!("model{index}")
}
