//! Signal hub
//!
//! Single ingress channel for everything actors and the pacer produce.
//!
//! ```text
//! ClientSink (per actor) ──┐
//! ClientSink (per actor) ──┼──► HubSender::emit ──► [bounded mpsc] ──► SignalHub::next ──► launcher dispatch
//! MediaPacer ──────────────┘
//! ```
//!
//! Signals from one sender keep their order. Nothing is promised across
//! senders.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::ClientId;
use crate::rtmp::{RtmpEvent, RtmpEventHandler};

use super::messages::Signal;

/// Signals buffered before `emit` starts waiting
pub const HUB_CAPACITY: usize = 1024;

/// Returned by [`HubSender::emit`] once the hub has shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClosed;

impl fmt::Display for HubClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal hub is shut down")
    }
}

impl std::error::Error for HubClosed {}

/// Receiving end, owned by the launcher's dispatch loop
pub struct SignalHub {
    tx: mpsc::Sender<Signal>,
    rx: mpsc::Receiver<Signal>,
    shut_down: bool,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::with_capacity(HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx,
            shut_down: false,
        }
    }

    pub fn sender(&self) -> HubSender {
        HubSender {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the next signal. `None` once the hub is shut down.
    pub async fn next(&mut self) -> Option<Signal> {
        if self.shut_down {
            return None;
        }
        self.rx.recv().await
    }

    /// Refuse further signals and drop whatever is still queued.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable emitting end
#[derive(Clone)]
pub struct HubSender {
    tx: mpsc::Sender<Signal>,
}

impl HubSender {
    /// Queue a signal, waiting only while the buffer is full.
    pub async fn emit(&self, signal: Signal) -> Result<(), HubClosed> {
        self.tx.send(signal).await.map_err(|_| HubClosed)
    }
}

/// Connection event handler of one actor, tagging every callback with the
/// actor's id before it enters the hub.
pub struct ClientSink {
    id: ClientId,
    hub: HubSender,
}

impl ClientSink {
    pub fn new(id: ClientId, hub: HubSender) -> Arc<Self> {
        Arc::new(Self { id, hub })
    }
}

#[async_trait]
impl RtmpEventHandler for ClientSink {
    async fn on_event(&self, event: RtmpEvent) {
        let target = self.id.clone();
        let signal = match event {
            RtmpEvent::StatusChanged(status) => Signal::Status { target, status },
            RtmpEvent::StreamCreated(stream) => Signal::StreamCreated { target, stream },
            RtmpEvent::PublishStarted(stream) => Signal::PublishStarted { target, stream },
            RtmpEvent::MessageReceived(message) => Signal::MediaReceived { target, message },
            RtmpEvent::Closed => Signal::Closed { target },
        };

        if self.hub.emit(signal).await.is_err() {
            trace!("dropping event for {} after hub shutdown", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::messages::SignalKind;
    use crate::model::ConnectionStatus;
    use crate::rtmp::StreamHandle;

    #[tokio::test]
    async fn test_preserves_order_per_sender() {
        let mut hub = SignalHub::new();
        let sender = hub.sender();
        let id = ClientId::from("a");

        for status in [
            ConnectionStatus::HandshakeOk,
            ConnectionStatus::Connect,
            ConnectionStatus::ConnectOk,
        ] {
            sender
                .emit(Signal::Status {
                    target: id.clone(),
                    status,
                })
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            match hub.next().await {
                Some(Signal::Status { status, .. }) => received.push(status),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(
            received,
            vec![
                ConnectionStatus::HandshakeOk,
                ConnectionStatus::Connect,
                ConnectionStatus::ConnectOk
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_ends_next_and_rejects_emit() {
        let mut hub = SignalHub::new();
        let sender = hub.sender();
        sender
            .emit(Signal::Closed {
                target: ClientId::from("a"),
            })
            .await
            .unwrap();

        hub.shutdown();
        hub.shutdown();

        assert!(hub.next().await.is_none());
        assert!(hub.is_shut_down());
        assert_eq!(
            sender
                .emit(Signal::Closed {
                    target: ClientId::from("a"),
                })
                .await,
            Err(HubClosed)
        );
    }

    #[tokio::test]
    async fn test_client_sink_tags_events() {
        let mut hub = SignalHub::new();
        let sink = ClientSink::new(ClientId::from("publisher-1"), hub.sender());

        sink.on_event(RtmpEvent::StreamCreated(StreamHandle(7))).await;
        sink.on_event(RtmpEvent::Closed).await;

        let created = hub.next().await.unwrap();
        assert_eq!(created.kind(), SignalKind::StreamCreated);
        assert_eq!(created.target(), Some(&ClientId::from("publisher-1")));

        let closed = hub.next().await.unwrap();
        assert_eq!(closed.kind(), SignalKind::Closed);
    }
}
