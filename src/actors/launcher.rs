//! LauncherActor - composition root of one test run
//!
//! Owns the routing table and the only receiving end of the signal hub.
//!
//! ## Message Flow
//!
//! ```text
//! spawn → N publishers (model1..modelN) + pacer + aggregator
//!
//! hub.next() ─┬─ Status / StreamCreated / Closed / MediaReceived ──► route to target actor
//!             ├─ PublishStarted ──► route + spawn M players for that stream key (once)
//!             └─ FrameReady ──────► every actor currently publishing
//!
//! Commands: Stop (teardown), Clients (routing table summary)
//! ```
//!
//! Actors stay in the table after their connection closes and are only
//! released on teardown, so a mid-run disconnect keeps counting against the
//! connected totals.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::media::MediaSource;
use crate::model::{ClientId, MediaFrame, Role, SharedReport, StartRequest, model_stream_key};
use crate::rtmp::RtmpConnector;

use super::aggregator::{AggregatorHandle, Roster};
use super::client::ActorHandle;
use super::hub::SignalHub;
use super::messages::{ActorCommand, ClientSummary, LauncherCommand, Signal};
use super::pacer::PacerHandle;

pub struct LauncherActor {
    request: StartRequest,
    server_url: Arc<str>,
    connector: Arc<dyn RtmpConnector>,

    hub: SignalHub,
    clients: HashMap<ClientId, ActorHandle>,

    /// Stream keys whose players have been started
    live_streams: HashSet<String>,

    roster_tx: watch::Sender<Roster>,
    pacer: PacerHandle,
    aggregator: AggregatorHandle,
    command_rx: mpsc::Receiver<LauncherCommand>,
}

impl LauncherActor {
    #[instrument(skip(self), fields(models = self.request.model_count, clients = self.request.client_count))]
    pub async fn run(mut self) {
        info!("starting test against {}", self.server_url);
        self.start_publishers();

        loop {
            tokio::select! {
                signal = self.hub.next() => match signal {
                    Some(signal) => self.dispatch(signal),
                    None => break,
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(LauncherCommand::Stop { respond_to }) => {
                        self.teardown().await;
                        // handles observe the launcher as gone once stop returns
                        self.command_rx.close();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(LauncherCommand::Clients { respond_to }) => {
                        let _ = respond_to.send(self.summaries());
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        self.teardown().await;
        debug!("launcher stopped");
    }

    fn spawn_client(&mut self, role: Role, stream_key: String) -> ActorHandle {
        let handle = ActorHandle::spawn(
            role,
            stream_key,
            self.server_url.clone(),
            self.connector.clone(),
            self.hub.sender(),
        );
        self.clients.insert(handle.id().clone(), handle.clone());
        handle
    }

    fn start_publishers(&mut self) {
        for index in 1..=self.request.model_count {
            self.spawn_client(Role::Publisher, model_stream_key(index));
        }
        self.publish_roster();
        debug!("started {} publishers", self.request.model_count);
    }

    fn start_players(&mut self, stream_key: &str) {
        for _ in 0..self.request.client_count {
            let player = self.spawn_client(Role::Player, stream_key.to_string());
            player.deliver(ActorCommand::PublisherLive);
        }
        self.publish_roster();
        info!(
            "{stream_key} is live, started {} players",
            self.request.client_count
        );
    }

    fn publish_roster(&self) {
        let roster: Vec<_> = self
            .clients
            .values()
            .map(|handle| handle.stats().clone())
            .collect();
        self.roster_tx.send_replace(Arc::new(roster));
    }

    fn dispatch(&mut self, signal: Signal) {
        match signal {
            Signal::FrameReady(frame) => self.broadcast(frame),
            Signal::Status { target, status } => {
                self.route(&target, ActorCommand::Status(status));
            }
            Signal::Closed { target } => self.route(&target, ActorCommand::Closed),
            Signal::StreamCreated { target, stream } => {
                self.route(&target, ActorCommand::StreamCreated(stream));
            }
            Signal::PublishStarted { target, stream } => {
                self.route(&target, ActorCommand::PublishStarted(stream));
                self.on_publisher_live(&target);
            }
            Signal::MediaReceived { target, message } => {
                self.route(&target, ActorCommand::Media(message));
            }
        }
    }

    fn route(&self, target: &ClientId, command: ActorCommand) {
        match self.clients.get(target) {
            Some(handle) => {
                if !handle.deliver(command) {
                    trace!("client {target} has already finished");
                }
            }
            None => debug!("client not found: {target}"),
        }
    }

    fn on_publisher_live(&mut self, target: &ClientId) {
        let Some(publisher) = self.clients.get(target) else {
            return;
        };
        if publisher.role() != Role::Publisher {
            return;
        }

        let stream_key = publisher.stream_key().to_string();
        if self.live_streams.insert(stream_key.clone()) {
            self.start_players(&stream_key);
        }
    }

    fn broadcast(&self, frame: Arc<MediaFrame>) {
        for handle in self.clients.values().filter(|handle| handle.is_publishing()) {
            if !handle.offer_frame(frame.clone()) {
                trace!("publisher {} is behind, frame dropped", handle.id());
            }
        }
    }

    fn summaries(&self) -> Vec<ClientSummary> {
        let mut summaries: Vec<_> = self.clients.values().map(ActorHandle::summary).collect();
        summaries.sort_by(|a, b| {
            (&a.stream_key, a.role == Role::Player, &a.id).cmp(&(
                &b.stream_key,
                b.role == Role::Player,
                &b.id,
            ))
        });
        summaries
    }

    async fn teardown(&mut self) {
        if self.hub.is_shut_down() {
            return;
        }

        info!("stopping {} clients", self.clients.len());
        for handle in self.clients.values() {
            handle.stop();
        }

        self.hub.shutdown();
        self.pacer.stop();
        if let Err(e) = self.aggregator.shutdown().await {
            debug!("aggregator already gone: {e:#}");
        }

        self.clients.clear();
        self.live_streams.clear();
        self.publish_roster();
    }
}

/// Handle for controlling a running test
#[derive(Clone)]
pub struct LauncherHandle {
    sender: mpsc::Sender<LauncherCommand>,
    aggregator: AggregatorHandle,
}

impl LauncherHandle {
    /// Spawn a launcher for `request`
    ///
    /// Publishers start dialing immediately; the pacer starts reading
    /// `source` right away.
    pub fn spawn(
        request: StartRequest,
        connector: Arc<dyn RtmpConnector>,
        source: Box<dyn MediaSource>,
        report: SharedReport,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (roster_tx, roster_rx) = watch::channel::<Roster>(Arc::new(Vec::new()));

        let hub = SignalHub::new();
        let aggregator = AggregatorHandle::spawn(roster_rx, report);
        let pacer = PacerHandle::spawn(source, hub.sender());

        let actor = LauncherActor {
            server_url: Arc::from(request.server_url.as_str()),
            request,
            connector,
            hub,
            clients: HashMap::new(),
            live_streams: HashSet::new(),
            roster_tx,
            pacer,
            aggregator: aggregator.clone(),
            command_rx: cmd_rx,
        };

        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(actor.run()).catch_unwind().await {
                error!("launcher panicked: {}", super::panic_message(panic.as_ref()));
            }
        });

        Self {
            sender: cmd_tx,
            aggregator,
        }
    }

    /// Stop every actor and wait for the launcher to acknowledge.
    ///
    /// Stopping a launcher that is already gone succeeds.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(LauncherCommand::Stop { respond_to: tx })
            .await
            .is_err()
        {
            debug!("launcher already stopped");
            // nobody else shuts the aggregator down after a launcher panic
            let _ = self.aggregator.shutdown().await;
            return Ok(());
        }

        if rx.await.is_err() {
            debug!("launcher exited before acknowledging stop");
        }
        Ok(())
    }

    /// Summaries of every client in the routing table
    pub async fn clients(&self) -> Result<Vec<ClientSummary>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LauncherCommand::Clients { respond_to: tx })
            .await
            .context("failed to send Clients command")?;

        rx.await.context("failed to receive response")
    }

    /// Force a statistics tick instead of waiting for the next second.
    pub async fn tick_now(&self) -> Result<()> {
        self.aggregator.tick_now().await
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
