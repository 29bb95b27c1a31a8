use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::store::ContextStore;
use super::telemetry::{TelemetryEvent, TelemetryRecorder};

/// Periodic idle-conversation eviction, independent of request handling.
pub struct EvictionSweeper {
    store: Arc<ContextStore>,
    idle_timeout: chrono::Duration,
    every: Duration,
    telemetry: Option<Arc<Mutex<TelemetryRecorder>>>,
}

impl EvictionSweeper {
    pub fn new(store: Arc<ContextStore>, idle_timeout: Duration, every: Duration) -> Self {
        Self {
            store,
            idle_timeout: chrono::Duration::from_std(idle_timeout).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            every,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Mutex<TelemetryRecorder>>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// One pass. Conversations mid-turn are skipped by the store.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.store.evict_idle(now, self.idle_timeout);
        if evicted > 0 {
            info!(evicted, remaining = self.store.len(), "idle conversations evicted");
            if let Some(telemetry) = &self.telemetry {
                telemetry.lock().record(TelemetryEvent::Evicted { count: evicted });
            }
        }
        evicted
    }

    /// Runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut cadence = interval(self.every);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(every_ms = self.every.as_millis() as u64, "eviction sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = cadence.tick() => {
                        self.sweep(Utc::now());
                    }
                }
            }
            debug!("eviction sweeper stopped");
        })
    }
}
