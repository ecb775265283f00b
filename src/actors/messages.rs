//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Signals**: everything produced by protocol callbacks or the pacer
//!    travels as a [`Signal`] through the hub to the launcher
//! 2. **Commands**: the launcher forwards routed signals to one actor as an
//!    [`ActorCommand`]
//! 3. **Request/Response**: queries against the launcher and aggregator use
//!    oneshot channels

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::model::{ClientId, ConnectionStatus, MediaFrame, Role};
use crate::rtmp::{MediaMessage, StreamHandle};

use super::client::ActorState;

/// Discriminant of a [`Signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Status,
    Closed,
    StreamCreated,
    PublishStarted,
    MediaReceived,
    FrameReady,
}

/// Event entering the hub
///
/// Every variant except `FrameReady` targets exactly one actor.
/// `FrameReady` is broadcast to all publishing actors.
#[derive(Debug, Clone)]
pub enum Signal {
    Status {
        target: ClientId,
        status: ConnectionStatus,
    },

    /// The server side of the connection went away
    Closed { target: ClientId },

    StreamCreated {
        target: ClientId,
        stream: StreamHandle,
    },

    /// The server accepted a `publish` command
    PublishStarted {
        target: ClientId,
        stream: StreamHandle,
    },

    /// Audio or video received by a player
    MediaReceived {
        target: ClientId,
        message: MediaMessage,
    },

    /// Next paced frame of the source file
    FrameReady(Arc<MediaFrame>),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Status { .. } => SignalKind::Status,
            Signal::Closed { .. } => SignalKind::Closed,
            Signal::StreamCreated { .. } => SignalKind::StreamCreated,
            Signal::PublishStarted { .. } => SignalKind::PublishStarted,
            Signal::MediaReceived { .. } => SignalKind::MediaReceived,
            Signal::FrameReady(_) => SignalKind::FrameReady,
        }
    }

    /// Routing key, `None` for broadcasts.
    pub fn target(&self) -> Option<&ClientId> {
        match self {
            Signal::Status { target, .. }
            | Signal::Closed { target }
            | Signal::StreamCreated { target, .. }
            | Signal::PublishStarted { target, .. }
            | Signal::MediaReceived { target, .. } => Some(target),
            Signal::FrameReady(_) => None,
        }
    }
}

/// Commands routed by the launcher to a single client actor
#[derive(Debug)]
pub enum ActorCommand {
    Status(ConnectionStatus),
    StreamCreated(StreamHandle),
    PublishStarted(StreamHandle),

    /// The publisher of this player's stream key is live
    PublisherLive,

    Media(MediaMessage),
    Closed,
}

/// Commands that can be sent to the launcher
#[derive(Debug)]
pub enum LauncherCommand {
    /// Stop every actor and end the run
    Stop { respond_to: oneshot::Sender<()> },

    /// Summaries of the routing table
    Clients {
        respond_to: oneshot::Sender<Vec<ClientSummary>>,
    },
}

/// Commands that can be sent to the aggregator
#[derive(Debug)]
pub enum AggregatorCommand {
    /// Run a tick immediately
    TickNow { respond_to: oneshot::Sender<()> },

    /// Stop ticking; answered once no further report write can happen
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Routing table entry as seen from outside the launcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub role: Role,
    pub stream_key: String,
    pub state: ActorState,
    pub status: ConnectionStatus,
}
