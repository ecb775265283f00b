//! Per-actor statistics counters
//!
//! Written by the owning actor, read by the aggregator. Everything is an
//! atomic so a tick never waits on an actor that is busy or stuck on the
//! network.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::time::Instant;

use crate::model::{ClientId, ConnectionStatus, Role, StatItem};

const UNSET: u64 = u64::MAX;

#[derive(Debug)]
pub struct StatCounters {
    role: Role,
    client_id: ClientId,
    stream_key: String,

    /// Reference point of every `*_ms` field
    origin: Instant,

    status: AtomicU8,
    audio_bytes: AtomicU64,
    video_bytes: AtomicU64,
    total_frames: AtomicU64,
    frames_at_last_tick: AtomicU64,
    fps: AtomicU64,
    audio_startup_secs: AtomicU64,
    video_startup_secs: AtomicU64,
    connect_at_ms: AtomicU64,
    started_at_ms: AtomicU64,
}

impl StatCounters {
    pub fn new(role: Role, client_id: ClientId, stream_key: impl Into<String>) -> Self {
        Self {
            role,
            client_id,
            stream_key: stream_key.into(),
            origin: Instant::now(),
            status: AtomicU8::new(ConnectionStatus::Idle.code()),
            audio_bytes: AtomicU64::new(0),
            video_bytes: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            frames_at_last_tick: AtomicU64::new(0),
            fps: AtomicU64::new(0),
            audio_startup_secs: AtomicU64::new(0),
            video_startup_secs: AtomicU64::new(0),
            connect_at_ms: AtomicU64::new(UNSET),
            started_at_ms: AtomicU64::new(UNSET),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.code(), Ordering::Relaxed);
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_code(self.status.load(Ordering::Relaxed))
    }

    /// Startup latencies are measured from here.
    pub fn mark_connect_command(&self) {
        self.connect_at_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Start of the active period; only the first call counts.
    pub fn mark_started(&self) {
        let _ = self.started_at_ms.compare_exchange(
            UNSET,
            self.now_ms(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    fn startup_secs(&self) -> u64 {
        let connect_at = match self.connect_at_ms.load(Ordering::Relaxed) {
            UNSET => 0,
            at => at,
        };
        self.now_ms().saturating_sub(connect_at) / 1000
    }

    pub fn record_audio(&self, bytes: usize) {
        if self.audio_bytes.fetch_add(bytes as u64, Ordering::Relaxed) == 0 {
            self.audio_startup_secs
                .store(self.startup_secs(), Ordering::Relaxed);
        }
    }

    /// One video message is one frame.
    pub fn record_video(&self, bytes: usize) {
        if self.video_bytes.fetch_add(bytes as u64, Ordering::Relaxed) == 0 {
            self.video_startup_secs
                .store(self.startup_secs(), Ordering::Relaxed);
        }
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.mark_started();
    }

    /// Recompute FPS as the frame delta since the previous tick.
    pub fn tick(&self) -> StatItem {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let previous = self.frames_at_last_tick.swap(frames, Ordering::Relaxed);
        self.fps
            .store(frames.saturating_sub(previous), Ordering::Relaxed);
        self.snapshot()
    }

    /// Copy of the counters as of the last tick.
    pub fn snapshot(&self) -> StatItem {
        let status = self.status();
        let total_time_secs = match self.started_at_ms.load(Ordering::Relaxed) {
            UNSET => 0,
            started => self.now_ms().saturating_sub(started) / 1000,
        };

        let mut item = StatItem::new(self.role, self.client_id.clone(), self.stream_key.clone());
        item.status = status;
        item.status_description = status.description().to_string();
        item.audio_bytes = self.audio_bytes.load(Ordering::Relaxed);
        item.video_bytes = self.video_bytes.load(Ordering::Relaxed);
        item.audio_startup_secs = self.audio_startup_secs.load(Ordering::Relaxed);
        item.video_startup_secs = self.video_startup_secs.load(Ordering::Relaxed);
        item.total_time_secs = total_time_secs;
        item.fps = self.fps.load(Ordering::Relaxed);
        item.total_frames = self.total_frames.load(Ordering::Relaxed);
        item
    }
}
