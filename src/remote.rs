//! Redis remote control
//!
//! Listens for `start_test` / `stop_test` on the `stress_test_client`
//! pub/sub channel and drives the [`TestSession`] with them. Start requests
//! take their counts from the `stress-test:model_count` and
//! `stress-test:client_count` keys and the server from the session default.
//! This instance's state is written to its field of the `stress_test:status`
//! hash as `ready`, `started` or `down`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::StartRequest;
use crate::session::TestSession;

pub const CONTROL_CHANNEL: &str = "stress_test_client";
pub const STATUS_MAP: &str = "stress_test:status";
pub const MODEL_COUNT_KEY: &str = "stress-test:model_count";
pub const CLIENT_COUNT_KEY: &str = "stress-test:client_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    StartTest,
    StopTest,
}

impl RemoteCommand {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim() {
            "start_test" => Some(Self::StartTest),
            "stop_test" => Some(Self::StopTest),
            _ => None,
        }
    }
}

/// Value of this instance in the status hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Ready,
    Started,
    Down,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Started => "started",
            Self::Down => "down",
        }
    }
}

/// Key-value side of the control surface
#[async_trait]
pub trait ControlStore: Send + 'static {
    async fn read_count(&mut self, key: &str) -> Result<Option<usize>>;

    async fn write_status(&mut self, instance: &str, status: RemoteStatus) -> Result<()>;
}

pub struct RedisStore {
    conn: MultiplexedConnection,
}

#[async_trait]
impl ControlStore for RedisStore {
    async fn read_count(&mut self, key: &str) -> Result<Option<usize>> {
        let value: Option<usize> = self
            .conn
            .get(key)
            .await
            .with_context(|| format!("failed to read {key}"))?;
        Ok(value)
    }

    async fn write_status(&mut self, instance: &str, status: RemoteStatus) -> Result<()> {
        let _: () = self
            .conn
            .hset(STATUS_MAP, instance, status.as_str())
            .await
            .context("failed to write status")?;
        Ok(())
    }
}

pub struct RemoteControl<S> {
    session: Arc<TestSession>,
    store: S,

    /// Field of this instance in the status hash
    instance: String,
}

impl<S: ControlStore> RemoteControl<S> {
    pub fn new(session: Arc<TestSession>, store: S, instance: impl Into<String>) -> Self {
        Self {
            session,
            store,
            instance: instance.into(),
        }
    }

    #[instrument(skip_all, fields(instance = %self.instance))]
    pub async fn run<C>(mut self, mut commands: C, mut shutdown: oneshot::Receiver<()>)
    where
        C: Stream<Item = String> + Unpin,
    {
        self.set_status(RemoteStatus::Ready).await;

        loop {
            tokio::select! {
                payload = commands.next() => match payload {
                    Some(payload) => self.handle(&payload).await,
                    None => {
                        warn!("control channel closed, shutting down");
                        break;
                    }
                },

                _ = &mut shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        self.set_status(RemoteStatus::Down).await;
    }

    pub async fn handle(&mut self, payload: &str) {
        match RemoteCommand::parse(payload) {
            Some(RemoteCommand::StartTest) => self.start().await,
            Some(RemoteCommand::StopTest) => self.stop().await,
            None => debug!("ignoring unknown command {payload:?}"),
        }
    }

    async fn start(&mut self) {
        let request = StartRequest {
            server_url: String::new(),
            model_count: self.count(MODEL_COUNT_KEY).await,
            client_count: self.count(CLIENT_COUNT_KEY).await,
        };

        match self.session.start(request).await {
            Ok(test_id) => {
                info!(%test_id, "started test from remote command");
                self.set_status(RemoteStatus::Started).await;
            }
            Err(e) => warn!("remote start rejected: {e}"),
        }
    }

    async fn stop(&mut self) {
        if let Err(e) = self.session.stop().await {
            warn!("failed to stop test: {e:#}");
        }
        self.set_status(RemoteStatus::Ready).await;
    }

    /// A missing or unreadable count reads as zero.
    async fn count(&mut self, key: &str) -> usize {
        match self.store.read_count(key).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                warn!("{key} is not set");
                0
            }
            Err(e) => {
                warn!("{e:#}");
                0
            }
        }
    }

    async fn set_status(&mut self, status: RemoteStatus) {
        if let Err(e) = self.store.write_status(&self.instance, status).await {
            warn!("{e:#}");
        }
    }
}

/// Handle for a running remote control task
pub struct RemoteControlHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RemoteControlHandle {
    pub fn spawn<S, C>(control: RemoteControl<S>, commands: C) -> Self
    where
        S: ControlStore,
        C: Stream<Item = String> + Unpin + Send + 'static,
    {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(control.run(commands, shutdown_rx));
        Self { shutdown, task }
    }

    /// Stop listening and mark this instance as down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("remote control task failed: {e}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `redis://host:port/db`, or a bare `host:port`
    pub url: String,
    pub instance: String,
}

fn redis_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{addr}")
    }
}

/// Connect to redis, subscribe to the control channel and start listening.
pub async fn spawn_remote_control(
    config: RemoteConfig,
    session: Arc<TestSession>,
) -> Result<RemoteControlHandle> {
    let url = redis_url(&config.url);
    let client = redis::Client::open(url.as_str()).context("invalid redis url")?;

    let conn = client
        .get_multiplexed_async_connection()
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to open pub/sub connection")?;
    pubsub
        .subscribe(CONTROL_CHANNEL)
        .await
        .with_context(|| format!("failed to subscribe to {CONTROL_CHANNEL}"))?;

    let commands = pubsub
        .into_on_message()
        .filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("unreadable control message: {e}");
                    None
                }
            }
        })
        .boxed();

    info!("listening for commands on {url} channel {CONTROL_CHANNEL}");
    let control = RemoteControl::new(session, RedisStore { conn }, config.instance);
    Ok(RemoteControlHandle::spawn(control, commands))
}
