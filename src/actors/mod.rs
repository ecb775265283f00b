//! Actor-based test orchestration
//!
//! Every simulated client, the media pacer and the statistics aggregator run
//! as independent tokio tasks. They never talk to each other directly.
//!
//! ## Architecture Overview
//!
//! ```text
//!        ┌──────────────┐  spawns   ┌──────────────────────────────┐
//!        │   Launcher   ├──────────►│ Publisher / Player actors    │
//!        │  (dispatch)  │           │ (one task + connection each) │
//!        └──▲────────┬──┘           └──────────────┬───────────────┘
//!           │        │ ActorCommand                │ protocol callbacks
//!           │        └─────────────────────────────┤
//!           │                                      ▼
//!           │ next()                      ┌─────────────────┐
//!           └─────────────────────────────┤   Signal hub    │◄──── MediaPacer (FrameReady)
//!                                         └─────────────────┘
//!
//!        Aggregator ── 1s tick ──► StatCounters of every actor ──► SharedReport
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Signals**: actors and the pacer emit into the hub; only the launcher reads it
//! 2. **Commands**: the launcher routes signals to actors over per-actor channels
//! 3. **Shared counters**: actors write lock-free counters the aggregator snapshots
//! 4. **Request/Response**: oneshot channels for queries against launcher and aggregator

pub mod aggregator;
pub mod client;
pub mod hub;
pub mod launcher;
pub mod messages;
pub mod pacer;
pub mod stats;

pub use aggregator::AggregatorHandle;
pub use client::{ActorHandle, ActorState};
pub use hub::{HubSender, SignalHub};
pub use launcher::LauncherHandle;
pub use messages::{ClientSummary, Signal, SignalKind};
pub use pacer::PacerHandle;
pub use stats::StatCounters;

use std::any::Any;

use tokio::sync::watch;

/// Resolves once a stop was requested or the stop sender is gone.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
