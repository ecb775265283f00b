//! MediaPacer - replays the source file at its recorded cadence
//!
//! ## Message Flow
//!
//! ```text
//! MediaSource::read_tag → wait until due → Signal::FrameReady → hub → every publishing actor
//!        ↑
//!        └── is_finished → loop_back, reset origin and wall clock
//! ```
//!
//! A tag is due when its offset from the first tag of the current loop has
//! been reached on the wall clock. Tags that are late go out immediately, so
//! the pacer catches up instead of dropping.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, trace};

use crate::media::{MediaError, MediaSource};

use super::hub::HubSender;
use super::messages::Signal;

/// Lateness tolerated before the pacer sleeps
pub const PACING_SLACK: Duration = Duration::from_millis(100);

/// How long to wait before emitting a tag `delta_ms` into the loop, given
/// the wall-clock time already spent in it.
pub fn pacing_delay(delta_ms: u32, elapsed: Duration) -> Option<Duration> {
    let due = Duration::from_millis(u64::from(delta_ms));
    (due > elapsed + PACING_SLACK).then(|| due - elapsed)
}

pub struct MediaPacer {
    source: Box<dyn MediaSource>,
    hub: HubSender,
    stop_rx: watch::Receiver<bool>,

    /// Timestamp of the first tag of the current loop
    origin: Option<u32>,
    loop_start: Instant,
    loops: u64,
}

impl MediaPacer {
    pub fn new(source: Box<dyn MediaSource>, hub: HubSender, stop_rx: watch::Receiver<bool>) -> Self {
        Self {
            source,
            hub,
            stop_rx,
            origin: None,
            loop_start: Instant::now(),
            loops: 0,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting media pacer");

        tokio::select! {
            biased;
            _ = super::stopped(self.stop_rx.clone()) => debug!("stop requested"),
            _ = self.pace() => {}
        }

        self.source.close().await;
        debug!("media pacer stopped after {} loops", self.loops);
    }

    async fn pace(&mut self) {
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("hub closed");
                    return;
                }
                Err(e) => {
                    error!("media source failed: {e}");
                    return;
                }
            }
        }
    }

    /// Emit one tag. `Ok(false)` once nobody is listening any more.
    async fn step(&mut self) -> Result<bool, MediaError> {
        if self.source.is_finished() {
            self.source.loop_back().await?;
            self.origin = None;
            self.loop_start = Instant::now();
            self.loops += 1;
            trace!("loop {} of the media source", self.loops);
        }

        let mut frame = self.source.read_tag().await?;
        let origin = *self.origin.get_or_insert(frame.timestamp);
        let delta = frame.timestamp.saturating_sub(origin);

        if let Some(delay) = pacing_delay(delta, self.loop_start.elapsed()) {
            tokio::time::sleep(delay).await;
        }

        frame.presentation_delta_ms = delta;
        Ok(self
            .hub
            .emit(Signal::FrameReady(Arc::new(frame)))
            .await
            .is_ok())
    }
}

/// Handle for controlling a MediaPacer
pub struct PacerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PacerHandle {
    pub fn spawn(source: Box<dyn MediaSource>, hub: HubSender) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let pacer = MediaPacer::new(source, hub, stop_rx);

        let task = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(pacer.run()).catch_unwind().await {
                error!("media pacer panicked: {}", super::panic_message(panic.as_ref()));
            }
        });

        Self { stop_tx, task }
    }

    /// Stop pacing and close the source. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the pacer task has ended (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
