//! AggregatorActor - folds per-actor counters into the shared report
//!
//! ## Message Flow
//!
//! ```text
//! 1s tick → roster snapshot → StatCounters::tick (per actor) → attach receivers → SharedReport::update
//!     ↑
//!     └─── Commands (TickNow, Shutdown)
//! ```
//!
//! The roster is published by the launcher whenever its routing table
//! changes; the aggregator only ever reads it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::model::{Role, SharedReport, StatItem};

use super::messages::AggregatorCommand;
use super::stats::StatCounters;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Counters of every actor in the routing table
pub type Roster = Arc<Vec<Arc<StatCounters>>>;

pub struct AggregatorActor {
    roster_rx: watch::Receiver<Roster>,
    report: SharedReport,
    command_rx: mpsc::Receiver<AggregatorCommand>,
    period: Duration,
}

impl AggregatorActor {
    pub fn new(
        roster_rx: watch::Receiver<Roster>,
        report: SharedReport,
        command_rx: mpsc::Receiver<AggregatorCommand>,
        period: Duration,
    ) -> Self {
        Self {
            roster_rx,
            report,
            command_rx,
            period,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting aggregator");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,

                cmd = self.command_rx.recv() => match cmd {
                    Some(AggregatorCommand::TickNow { respond_to }) => {
                        self.tick().await;
                        let _ = respond_to.send(());
                    }
                    Some(AggregatorCommand::Shutdown { respond_to }) => {
                        debug!("received shutdown command");
                        self.command_rx.close();
                        let _ = respond_to.send(());
                        break;
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        debug!("aggregator stopped");
    }

    async fn tick(&mut self) {
        let roster = self.roster_rx.borrow().clone();

        let mut items: Vec<StatItem> = roster.iter().map(|counters| counters.tick()).collect();
        attach_receivers(&mut items);

        trace!("folding {} stat items", items.len());
        self.report.update(&items, Utc::now()).await;
    }
}

/// Give every publisher a copy of the connected players on its stream key.
pub fn attach_receivers(items: &mut [StatItem]) {
    let players: Vec<StatItem> = items
        .iter()
        .filter(|item| item.role == Role::Player && item.status.is_ready())
        .cloned()
        .collect();

    for publisher in items.iter_mut().filter(|item| item.role == Role::Publisher) {
        publisher.receivers = players
            .iter()
            .filter(|player| player.stream_key == publisher.stream_key)
            .map(|player| (player.client_id.clone(), player.clone()))
            .collect();
    }
}

/// Handle for controlling an AggregatorActor
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn spawn(roster_rx: watch::Receiver<Roster>, report: SharedReport) -> Self {
        Self::spawn_with_period(roster_rx, report, TICK_PERIOD)
    }

    pub fn spawn_with_period(
        roster_rx: watch::Receiver<Roster>,
        report: SharedReport,
        period: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AggregatorActor::new(roster_rx, report, cmd_rx, period);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a tick now and wait until the report has been updated.
    pub async fn tick_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive response")?;
        Ok(())
    }

    /// Stop the aggregator, waiting for an in-flight tick to land first.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")?;
        Ok(())
    }
}
