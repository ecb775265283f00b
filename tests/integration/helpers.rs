//! Scripted RTMP server and in-memory media for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rtmp_stress::{
    media::{self, MediaError, MediaOpener, MediaSource},
    model::{ConnectionStatus, MediaFrame, StartRequest, TagType},
    rtmp::{
        self, MediaMessage, PublishMode, RtmpConnection, RtmpConnector, RtmpError, RtmpEvent,
        RtmpEventHandler, StreamHandle,
    },
    session::TestSession,
};
use tokio::task::JoinHandle;

pub const SERVER: &str = "rtmp://127.0.0.1:1935/live";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    /// Every command succeeds
    Healthy,
    /// Every dial fails
    RefuseDial,
    /// Dial never completes
    HangDial,
    /// The server drops publishers right after accepting them
    DropPublishers,
}

#[derive(Default)]
struct Counters {
    dials: AtomicUsize,
    publishes: AtomicUsize,
    plays: AtomicUsize,
    frames_published: AtomicUsize,
    closes: AtomicUsize,
}

/// Connector that answers every command from a fixed script.
#[derive(Clone)]
pub struct MockConnector {
    script: Script,
    counters: Arc<Counters>,
}

impl MockConnector {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            counters: Arc::default(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_script(Script::Healthy)
    }

    pub fn refusing() -> Self {
        Self::with_script(Script::RefuseDial)
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::HangDial)
    }

    pub fn dropping_publishers() -> Self {
        Self::with_script(Script::DropPublishers)
    }

    pub fn dials(&self) -> usize {
        self.counters.dials.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> usize {
        self.counters.publishes.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> usize {
        self.counters.plays.load(Ordering::SeqCst)
    }

    pub fn frames_published(&self) -> usize {
        self.counters.frames_published.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtmpConnector for MockConnector {
    async fn dial(
        &self,
        _url: &str,
        handler: Arc<dyn RtmpEventHandler>,
    ) -> rtmp::Result<Box<dyn RtmpConnection>> {
        self.counters.dials.fetch_add(1, Ordering::SeqCst);

        match self.script {
            Script::RefuseDial => {
                return Err(RtmpError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Script::HangDial => std::future::pending::<()>().await,
            _ => {}
        }

        handler
            .on_event(RtmpEvent::StatusChanged(ConnectionStatus::HandshakeOk))
            .await;

        Ok(Box::new(MockConnection {
            script: self.script,
            counters: self.counters.clone(),
            handler,
            feeder: None,
        }))
    }
}

struct MockConnection {
    script: Script,
    counters: Arc<Counters>,
    handler: Arc<dyn RtmpEventHandler>,

    /// Plays video to a player until closed
    feeder: Option<JoinHandle<()>>,
}

#[async_trait]
impl RtmpConnection for MockConnection {
    async fn connect(&mut self) -> rtmp::Result<()> {
        self.handler
            .on_event(RtmpEvent::StatusChanged(ConnectionStatus::ConnectOk))
            .await;
        Ok(())
    }

    async fn create_stream(&mut self) -> rtmp::Result<()> {
        self.handler
            .on_event(RtmpEvent::StatusChanged(ConnectionStatus::CreateStreamOk))
            .await;
        self.handler
            .on_event(RtmpEvent::StreamCreated(StreamHandle(1)))
            .await;
        Ok(())
    }

    async fn publish(&mut self, stream: StreamHandle, _key: &str, _mode: PublishMode) -> rtmp::Result<()> {
        self.counters.publishes.fetch_add(1, Ordering::SeqCst);
        self.handler.on_event(RtmpEvent::PublishStarted(stream)).await;

        if self.script == Script::DropPublishers {
            self.handler.on_event(RtmpEvent::Closed).await;
        }
        Ok(())
    }

    async fn play(&mut self, _stream: StreamHandle, _key: &str) -> rtmp::Result<()> {
        self.counters.plays.fetch_add(1, Ordering::SeqCst);

        let handler = self.handler.clone();
        self.feeder = Some(tokio::spawn(async move {
            let mut timestamp = 0;
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                handler
                    .on_event(RtmpEvent::MessageReceived(MediaMessage {
                        tag_type: TagType::Video,
                        timestamp,
                        payload: Bytes::from_static(&[0x27, 0x01, 0, 0, 0]),
                    }))
                    .await;
                timestamp += 20;
            }
        }));
        Ok(())
    }

    async fn publish_data(
        &mut self,
        _stream: StreamHandle,
        _tag_type: TagType,
        _payload: Bytes,
        _timestamp: u32,
    ) -> rtmp::Result<()> {
        self.counters.frames_published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// 25 fps of video looping every 400ms
pub struct LoopingSource {
    timestamps: Vec<u32>,
    position: usize,
}

impl LoopingSource {
    pub fn boxed() -> Box<dyn MediaSource> {
        Box::new(Self {
            timestamps: (0..10).map(|i| i * 40).collect(),
            position: 0,
        })
    }
}

#[async_trait]
impl MediaSource for LoopingSource {
    async fn read_tag(&mut self) -> media::Result<MediaFrame> {
        let timestamp = *self
            .timestamps
            .get(self.position)
            .ok_or(MediaError::Closed)?;
        self.position += 1;

        Ok(MediaFrame {
            tag_type: TagType::Video,
            timestamp,
            tag_size: 5,
            payload: Bytes::from_static(&[0x17, 0x01, 0, 0, 0]),
            presentation_delta_ms: 0,
        })
    }

    fn is_finished(&self) -> bool {
        self.position >= self.timestamps.len()
    }

    async fn loop_back(&mut self) -> media::Result<()> {
        self.position = 0;
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Source whose first read fails
pub struct BrokenSource;

#[async_trait]
impl MediaSource for BrokenSource {
    async fn read_tag(&mut self) -> media::Result<MediaFrame> {
        Err(MediaError::CorruptTag {
            offset: 13,
            reason: "truncated tag header".to_string(),
        })
    }

    fn is_finished(&self) -> bool {
        false
    }

    async fn loop_back(&mut self) -> media::Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

pub struct LoopingMedia;

#[async_trait]
impl MediaOpener for LoopingMedia {
    async fn open(&self) -> media::Result<Box<dyn MediaSource>> {
        Ok(LoopingSource::boxed())
    }
}

pub fn session_with(connector: &MockConnector) -> Arc<TestSession> {
    Arc::new(TestSession::new(
        Arc::new(connector.clone()),
        Arc::new(LoopingMedia),
        Some(SERVER.to_string()),
    ))
}

pub fn request(model_count: usize, client_count: usize) -> StartRequest {
    StartRequest {
        server_url: SERVER.to_string(),
        model_count,
        client_count,
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "timed out waiting for {what}");
}
