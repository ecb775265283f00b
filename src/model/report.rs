//! Aggregate report of the active test run

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};

use super::stat::{Role, StatItem};

/// Aggregate, point-in-time statistics of one test run.
///
/// Averages only include clients that reached the ready status and moved
/// frames during the last tick. When no such client exists for a role the
/// averages of that role keep their previous values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub test_id: String,
    pub start_time: DateTime<Utc>,

    /// Seconds since `start_time`
    pub total_time_secs: i64,

    pub total_clients: i64,
    pub requested_models: i64,
    pub requested_clients: i64,
    pub connected_models: i64,
    pub connected_clients: i64,

    /// `requested_models - connected_models`
    pub model_lag: i64,

    /// `requested_clients - connected_clients`
    pub client_lag: i64,

    pub average_model_fps: f64,
    pub average_client_fps: f64,

    /// Averages in KiB
    pub average_audio_kib_sent: f64,
    pub average_video_kib_sent: f64,
    pub average_audio_kib_received: f64,
    pub average_video_kib_received: f64,

    pub average_publish_secs: f64,
    pub average_play_secs: f64,

    pub average_publish_startup_secs: f64,
    pub average_play_startup_secs: f64,
}

impl Default for Report {
    fn default() -> Self {
        Self::new("", 0, 0, Utc::now())
    }
}

#[derive(Default)]
struct RoleTotals {
    count: i64,
    fps: u64,
    audio_bytes: u64,
    video_bytes: u64,
    active_secs: u64,
    video_startup_secs: u64,
}

impl RoleTotals {
    fn add(&mut self, item: &StatItem) {
        self.count += 1;
        self.fps += item.fps;
        self.audio_bytes += item.audio_bytes;
        self.video_bytes += item.video_bytes;
        self.active_secs += item.total_time_secs;
        self.video_startup_secs += item.video_startup_secs;
    }

    fn average(&self, sum: u64) -> f64 {
        sum as f64 / self.count as f64
    }

    fn average_kib(&self, sum: u64) -> f64 {
        self.average(sum) / 1024.0
    }
}

impl Report {
    pub fn new(
        test_id: impl Into<String>,
        model_count: usize,
        client_count: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let models = i64::try_from(model_count).unwrap_or(i64::MAX);
        let clients = i64::try_from(client_count)
            .unwrap_or(i64::MAX)
            .saturating_mul(models);

        Self {
            test_id: test_id.into(),
            start_time: now,
            total_time_secs: 0,
            total_clients: clients.saturating_add(models),
            requested_models: models,
            requested_clients: clients,
            connected_models: 0,
            connected_clients: 0,
            model_lag: models,
            client_lag: clients,
            average_model_fps: 0.0,
            average_client_fps: 0.0,
            average_audio_kib_sent: 0.0,
            average_video_kib_sent: 0.0,
            average_audio_kib_received: 0.0,
            average_video_kib_received: 0.0,
            average_publish_secs: 0.0,
            average_play_secs: 0.0,
            average_publish_startup_secs: 0.0,
            average_play_startup_secs: 0.0,
        }
    }

    /// Zero every field and start a new run.
    pub fn reset(
        &mut self,
        test_id: impl Into<String>,
        model_count: usize,
        client_count: usize,
        now: DateTime<Utc>,
    ) {
        tracing::debug!(model_count, client_count, "resetting report");
        *self = Self::new(test_id, model_count, client_count, now);
    }

    /// Fold a set of client snapshots into the report.
    pub fn update<'a>(&mut self, items: impl IntoIterator<Item = &'a StatItem>, now: DateTime<Utc>) {
        let mut models = RoleTotals::default();
        let mut clients = RoleTotals::default();

        for item in items.into_iter().filter(|item| item.is_active()) {
            match item.role {
                Role::Publisher => models.add(item),
                Role::Player => clients.add(item),
            }
        }

        self.connected_models = models.count;
        self.connected_clients = clients.count;
        self.model_lag = self.requested_models - self.connected_models;
        self.client_lag = self.requested_clients - self.connected_clients;

        if models.count > 0 {
            self.average_model_fps = models.average(models.fps);
            self.average_audio_kib_sent = models.average_kib(models.audio_bytes);
            self.average_video_kib_sent = models.average_kib(models.video_bytes);
            self.average_publish_secs = models.average(models.active_secs);
            self.average_publish_startup_secs = models.average(models.video_startup_secs);
        }

        if clients.count > 0 {
            self.average_client_fps = clients.average(clients.fps);
            self.average_audio_kib_received = clients.average_kib(clients.audio_bytes);
            self.average_video_kib_received = clients.average_kib(clients.video_bytes);
            self.average_play_secs = clients.average(clients.active_secs);
            self.average_play_startup_secs = clients.average(clients.video_startup_secs);
        }

        self.total_time_secs = (now - self.start_time).num_seconds().max(0);
    }
}

/// Report shared between the aggregator (sole writer during a run) and the
/// control plane (readers, reset on start/stop).
#[derive(Debug, Clone, Default)]
pub struct SharedReport {
    inner: Arc<RwLock<Report>>,
}

impl SharedReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current report.
    pub async fn snapshot(&self) -> Report {
        self.inner.read().await.clone()
    }

    pub async fn reset(&self, test_id: impl Into<String>, model_count: usize, client_count: usize) {
        self.write()
            .await
            .reset(test_id, model_count, client_count, Utc::now());
    }

    pub async fn update<'a>(&self, items: impl IntoIterator<Item = &'a StatItem>, now: DateTime<Utc>) {
        self.write().await.update(items, now);
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Report> {
        self.inner.write().await
    }
}
