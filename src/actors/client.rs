//! Simulated RTMP client
//!
//! One actor per publisher or player. The actor owns its connection and
//! advances its state machine from commands the launcher routes to it.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Connecting → Connected → StreamRequested → StreamReady ─┬─► Publishing (publisher)
//!            │            │              │               │        └─► Playing    (player)
//!            └────────────┴──────────────┴───────────────┴──► Failed
//!
//! any state ── stop() ──► Closed
//! ```
//!
//! A player only sends `play` once it holds a stream handle and the
//! launcher has told it the publisher of its stream key is live.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::model::{ClientId, ConnectionStatus, MediaFrame, Role, TagType};
use crate::rtmp::{
    MediaMessage, PublishMode, RtmpConnection, RtmpConnector, RtmpError, StreamHandle,
};

use super::hub::{ClientSink, HubSender};
use super::stopped;
use super::messages::{ActorCommand, ClientSummary};
use super::stats::StatCounters;

/// Frames queued for a publisher before new ones are dropped
pub const FRAME_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    Idle,
    Connecting,
    Connected,
    StreamRequested,
    StreamReady,
    Publishing,
    Playing,
    Closed,
    Failed,
}

impl ActorState {
    const ALL: [ActorState; 9] = [
        ActorState::Idle,
        ActorState::Connecting,
        ActorState::Connected,
        ActorState::StreamRequested,
        ActorState::StreamReady,
        ActorState::Publishing,
        ActorState::Playing,
        ActorState::Closed,
        ActorState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, ActorState::Closed | ActorState::Failed)
    }
}

/// State readable from outside the actor task
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ActorState::Idle as u8)))
    }

    fn get(&self) -> ActorState {
        ActorState::ALL[self.0.load(Ordering::Acquire) as usize]
    }

    fn set(&self, state: ActorState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

enum Flow {
    Continue,
    Stop,
}

type StepResult = Result<Flow, RtmpError>;

pub struct ClientActor {
    id: ClientId,
    role: Role,
    stream_key: String,
    server_url: Arc<str>,

    connector: Arc<dyn RtmpConnector>,
    hub: HubSender,

    /// `None` before dialing and after close
    connection: Option<Box<dyn RtmpConnection>>,
    stream: Option<StreamHandle>,
    publisher_live: bool,

    state: StateCell,
    counters: Arc<StatCounters>,

    command_rx: mpsc::UnboundedReceiver<ActorCommand>,
    frame_rx: mpsc::Receiver<Arc<MediaFrame>>,
    stop_rx: watch::Receiver<bool>,
}

impl ClientActor {
    #[instrument(skip(self), fields(client = %self.id, role = ?self.role, stream_key = %self.stream_key))]
    pub async fn run(mut self) {
        debug!("starting client actor");

        let opened = tokio::select! {
            biased;
            _ = stopped(self.stop_rx.clone()) => None,
            result = self.open() => Some(result),
        };

        match opened {
            Some(Ok(())) => self.event_loop().await,
            Some(Err(e)) => self.fail(&e),
            None => debug!("stopped while connecting"),
        }

        self.close().await;
        if !self.state.get().is_terminal() {
            self.state.set(ActorState::Closed);
        }

        debug!("client actor stopped");
    }

    async fn open(&mut self) -> Result<(), RtmpError> {
        self.state.set(ActorState::Connecting);
        self.counters.mark_connect_command();

        let sink = ClientSink::new(self.id.clone(), self.hub.clone());
        let connection = self.connector.dial(&self.server_url, sink).await?;
        self.connection = Some(connection);
        self.connection()?.connect().await
    }

    async fn event_loop(&mut self) {
        let stop = stopped(self.stop_rx.clone());
        tokio::pin!(stop);

        loop {
            let step = tokio::select! {
                biased;

                _ = &mut stop => {
                    debug!("stop requested");
                    self.state.set(ActorState::Closed);
                    break;
                }

                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("command channel closed");
                        break;
                    }
                },

                Some(frame) = self.frame_rx.recv() => self.publish_frame(&frame).await,
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    self.fail(&e);
                    break;
                }
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Box<dyn RtmpConnection>, RtmpError> {
        self.connection.as_mut().ok_or(RtmpError::Closed)
    }

    fn fail(&self, error: &RtmpError) {
        warn!("{:?} failed: {error}", self.role);
        self.counters.set_status(ConnectionStatus::Error);
        self.state.set(ActorState::Failed);
    }

    async fn handle_command(&mut self, command: ActorCommand) -> StepResult {
        match command {
            ActorCommand::Status(status) => self.on_status(status).await,
            ActorCommand::StreamCreated(stream) => self.on_stream_created(stream).await,
            ActorCommand::PublishStarted(stream) => {
                self.on_publish_started(stream);
                Ok(Flow::Continue)
            }
            ActorCommand::PublisherLive => {
                self.publisher_live = true;
                self.try_play().await
            }
            ActorCommand::Media(message) => {
                self.on_media(&message);
                Ok(Flow::Continue)
            }
            ActorCommand::Closed => {
                info!("connection closed by server");
                self.state.set(ActorState::Closed);
                Ok(Flow::Stop)
            }
        }
    }

    async fn on_status(&mut self, status: ConnectionStatus) -> StepResult {
        trace!("status {}", status.description());
        self.counters.set_status(status);

        match status {
            ConnectionStatus::ConnectOk if self.state.get() == ActorState::Connecting => {
                self.state.set(ActorState::Connected);
                self.connection()?.create_stream().await?;
                self.state.set(ActorState::StreamRequested);
                Ok(Flow::Continue)
            }
            ConnectionStatus::Error => {
                warn!("server reported an error");
                self.state.set(ActorState::Failed);
                Ok(Flow::Stop)
            }
            _ => Ok(Flow::Continue),
        }
    }

    async fn on_stream_created(&mut self, stream: StreamHandle) -> StepResult {
        if self.state.get() != ActorState::StreamRequested {
            debug!("unexpected stream {stream:?} in {:?}", self.state.get());
            return Ok(Flow::Continue);
        }

        self.stream = Some(stream);
        self.state.set(ActorState::StreamReady);

        match self.role {
            Role::Publisher => {
                let key = self.stream_key.clone();
                self.connection()?
                    .publish(stream, &key, PublishMode::Live)
                    .await?;
                Ok(Flow::Continue)
            }
            Role::Player => self.try_play().await,
        }
    }

    fn on_publish_started(&mut self, stream: StreamHandle) {
        if self.role != Role::Publisher || self.state.get() != ActorState::StreamReady {
            debug!("ignoring publish start on {stream:?}");
            return;
        }

        self.state.set(ActorState::Publishing);
        self.counters.mark_started();
        info!("publishing");
    }

    async fn try_play(&mut self) -> StepResult {
        if self.role != Role::Player
            || !self.publisher_live
            || self.state.get() != ActorState::StreamReady
        {
            return Ok(Flow::Continue);
        }

        let Some(stream) = self.stream else {
            return Ok(Flow::Continue);
        };

        let key = self.stream_key.clone();
        self.connection()?.play(stream, &key).await?;
        self.state.set(ActorState::Playing);
        debug!("playing");
        Ok(Flow::Continue)
    }

    fn on_media(&self, message: &MediaMessage) {
        if self.state.get() != ActorState::Playing {
            trace!("dropping media outside of play");
            return;
        }

        match message.tag_type {
            TagType::Audio => self.counters.record_audio(message.payload.len()),
            TagType::Video => self.counters.record_video(message.payload.len()),
            TagType::Script => {}
        }
    }

    async fn publish_frame(&mut self, frame: &MediaFrame) -> StepResult {
        if self.state.get() != ActorState::Publishing {
            return Ok(Flow::Continue);
        }
        let Some(stream) = self.stream else {
            return Ok(Flow::Continue);
        };

        match frame.tag_type {
            TagType::Audio => self.counters.record_audio(frame.payload.len()),
            TagType::Video => self.counters.record_video(frame.payload.len()),
            TagType::Script => return Ok(Flow::Continue),
        }

        let sent = self
            .connection()?
            .publish_data(
                stream,
                frame.tag_type,
                frame.payload.clone(),
                frame.presentation_delta_ms,
            )
            .await;

        if let Err(e) = sent {
            warn!("failed to publish frame: {e}");
            self.counters.set_status(ConnectionStatus::Closed);
            self.state.set(ActorState::Closed);
            return Ok(Flow::Stop);
        }

        Ok(Flow::Continue)
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

/// Handle for controlling a ClientActor
///
/// Cheap to clone. Every method is non-blocking, so the launcher's
/// dispatch loop never waits on an actor.
#[derive(Clone)]
pub struct ActorHandle {
    id: ClientId,
    role: Role,
    stream_key: String,
    command_tx: mpsc::UnboundedSender<ActorCommand>,
    frame_tx: mpsc::Sender<Arc<MediaFrame>>,
    stop_tx: Arc<watch::Sender<bool>>,
    state: StateCell,
    counters: Arc<StatCounters>,
}

impl ActorHandle {
    /// Spawn a new client actor
    ///
    /// The actor starts dialing `server_url` right away.
    pub fn spawn(
        role: Role,
        stream_key: impl Into<String>,
        server_url: Arc<str>,
        connector: Arc<dyn RtmpConnector>,
        hub: HubSender,
    ) -> Self {
        let id = ClientId::generate();
        let stream_key = stream_key.into();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = StateCell::new();
        let counters = Arc::new(StatCounters::new(role, id.clone(), stream_key.clone()));

        let actor = ClientActor {
            id: id.clone(),
            role,
            stream_key: stream_key.clone(),
            server_url,
            connector,
            hub,
            connection: None,
            stream: None,
            publisher_live: false,
            state: state.clone(),
            counters: counters.clone(),
            command_rx,
            frame_rx,
            stop_rx,
        };

        let panic_state = state.clone();
        let panic_counters = counters.clone();
        let panic_id = id.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(actor.run()).catch_unwind().await {
                error!(
                    "client actor {panic_id} panicked: {}",
                    super::panic_message(panic.as_ref())
                );
                panic_counters.set_status(ConnectionStatus::Error);
                panic_state.set(ActorState::Failed);
            }
        });

        Self {
            id,
            role,
            stream_key,
            command_tx,
            frame_tx,
            stop_tx: Arc::new(stop_tx),
            state,
            counters,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Queue a command. Returns `false` once the actor has finished.
    pub fn deliver(&self, command: ActorCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Offer a frame without waiting; dropped when the buffer is full.
    pub fn offer_frame(&self, frame: Arc<MediaFrame>) -> bool {
        self.frame_tx.try_send(frame).is_ok()
    }

    /// Ask the actor to close its connection. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn state(&self) -> ActorState {
        self.state.get()
    }

    pub fn is_publishing(&self) -> bool {
        self.role == Role::Publisher && self.state() == ActorState::Publishing
    }

    pub fn stats(&self) -> &Arc<StatCounters> {
        &self.counters
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.id.clone(),
            role: self.role,
            stream_key: self.stream_key.clone(),
            state: self.state(),
            status: self.counters.status(),
        }
    }
}
