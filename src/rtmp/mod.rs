//! RTMP protocol capability
//!
//! The actors only talk to a server through the traits in this module:
//!
//! ```text
//! RtmpConnector::dial ──► RtmpConnection ──► connect / create_stream / publish / play
//!                               │
//!                               └──► RtmpEventHandler::on_event (status, stream created, media, closed)
//! ```
//!
//! Commands are issued by the owning actor; everything the server sends
//! back arrives asynchronously through the event handler passed to `dial`.
//! [`tcp::TcpConnector`] is the implementation used against real servers.

pub mod amf0;
pub mod chunk;
pub mod error;
pub mod handshake;
pub mod tcp;

pub use error::{Result, RtmpError};
pub use tcp::{RtmpUrl, TcpConnector};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::{ConnectionStatus, TagType};

/// Message stream id returned by `createStream`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u32);

/// Publishing type sent with the `publish` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Live,
    Record,
    Append,
}

impl PublishMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishMode::Live => "live",
            PublishMode::Record => "record",
            PublishMode::Append => "append",
        }
    }
}

/// Audio or video message received from the server
#[derive(Debug, Clone)]
pub struct MediaMessage {
    pub tag_type: TagType,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Callbacks raised by a connection
#[derive(Debug, Clone)]
pub enum RtmpEvent {
    StatusChanged(ConnectionStatus),
    StreamCreated(StreamHandle),
    PublishStarted(StreamHandle),
    MessageReceived(MediaMessage),
    Closed,
}

/// Receiver of connection callbacks
#[async_trait]
pub trait RtmpEventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: RtmpEvent);
}

/// Factory for outbound connections
#[async_trait]
pub trait RtmpConnector: Send + Sync + 'static {
    /// Open a transport to the server named by `url`.
    ///
    /// The returned connection is not yet RTMP-connected; call
    /// [`RtmpConnection::connect`].
    async fn dial(
        &self,
        url: &str,
        handler: Arc<dyn RtmpEventHandler>,
    ) -> Result<Box<dyn RtmpConnection>>;
}

/// One outbound RTMP connection
#[async_trait]
pub trait RtmpConnection: Send {
    /// Send the `connect` command. Success is reported as
    /// `StatusChanged(ConnectOk)`.
    async fn connect(&mut self) -> Result<()>;

    /// Send `createStream`. The stream arrives as `StreamCreated`.
    async fn create_stream(&mut self) -> Result<()>;

    async fn publish(&mut self, stream: StreamHandle, key: &str, mode: PublishMode) -> Result<()>;

    async fn play(&mut self, stream: StreamHandle, key: &str) -> Result<()>;

    /// Push one audio/video tag body on a publishing stream.
    async fn publish_data(
        &mut self,
        stream: StreamHandle,
        tag_type: TagType,
        payload: Bytes,
        timestamp: u32,
    ) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&mut self);
}
