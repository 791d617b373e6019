//! Per-service traffic accounting shared by the capture loop, the discovery
//! monitor and the query API.
//!
//! One reader/writer lock covers both map structure and counters, so a
//! snapshot is always a point-in-time copy consistent with some interleaving of
//! completed writes. All access goes through [`StatsStore`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::AppError;

/// How a service is attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceMode {
    /// Shares the host interface; accounted by port.
    #[serde(rename = "host")]
    Host,
    /// Own network namespace; known only through discovery.
    #[serde(rename = "bridge")]
    Isolated,
}

/// Which counter a credit lands on, from the service's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// A byte amount to add to one service's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit<'a> {
    pub service: &'a str,
    pub direction: Direction,
    pub amount: u64,
}

/// Running byte counters for a single service. Cumulative totals never decrease.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub upload_bytes: u64,
    pub download_bytes: u64,
    prev_upload: u64,
    prev_download: u64,
    last_tick: Option<Instant>,
    /// Approximate inbound rate in bytes/sec, refreshed by the rate ticker.
    pub speed_in: f64,
    /// Approximate outbound rate in bytes/sec.
    pub speed_out: f64,
}

impl TrafficCounters {
    fn add(&mut self, direction: Direction, amount: u64) {
        let counter = match direction {
            Direction::Upload => &mut self.upload_bytes,
            Direction::Download => &mut self.download_bytes,
        };
        *counter = counter.saturating_add(amount);
    }
}

#[derive(Debug)]
struct ServiceStats {
    mode: ServiceMode,
    counters: TrafficCounters,
}

/// Snapshot of one service's traffic state, serialized for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub mode: ServiceMode,
    /// Cumulative bytes sent by the service since startup.
    #[serde(rename = "upload")]
    pub upload_bytes: u64,
    /// Cumulative bytes received by the service since startup.
    #[serde(rename = "download")]
    pub download_bytes: u64,
    pub speed_in: f64,
    pub speed_out: f64,
}

/// Thread-safe traffic store. Keyed by service name.
///
/// Entries are created lazily and never removed while the process runs.
#[derive(Debug, Default)]
pub struct StatsStore {
    entries: RwLock<HashMap<String, ServiceStats>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-applied addition,
    // so poisoned guards are still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ServiceStats>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ServiceStats>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a zeroed entry if `name` is unknown. Returns `true` if it was created.
    /// The mode of an existing entry is never changed.
    pub fn ensure(&self, name: &str, mode: ServiceMode) -> bool {
        if self.read().contains_key(name) {
            return false;
        }
        ensure_entry(&mut self.write(), name, mode)
    }

    /// Add `amount` to one counter of an existing entry.
    pub fn credit(&self, name: &str, direction: Direction, amount: u64) -> Result<(), AppError> {
        let mut entries = self.write();
        let stats = entries
            .get_mut(name)
            .ok_or_else(|| AppError::UnknownService(name.to_string()))?;
        stats.counters.add(direction, amount);
        Ok(())
    }

    /// Apply every credit produced for one captured frame inside a single
    /// critical section, materializing host entries as needed. Readers see
    /// either none or all of the frame's credits.
    pub fn record_frame(&self, credits: &[Credit<'_>]) {
        if credits.is_empty() {
            return;
        }
        let mut entries = self.write();
        for credit in credits {
            ensure_entry(&mut entries, credit.service, ServiceMode::Host);
            if let Some(stats) = entries.get_mut(credit.service) {
                stats.counters.add(credit.direction, credit.amount);
            }
        }
    }

    /// Point-in-time copy of every entry, ordered by name.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let mut list: Vec<ServiceSnapshot> = self
            .read()
            .iter()
            .map(|(name, stats)| ServiceSnapshot {
                name: name.clone(),
                mode: stats.mode,
                upload_bytes: stats.counters.upload_bytes,
                download_bytes: stats.counters.download_bytes,
                speed_in: stats.counters.speed_in,
                speed_out: stats.counters.speed_out,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Recalculate speeds for all tracked services. Call once per tick.
    pub fn tick_speeds(&self) {
        let now = Instant::now();
        for stats in self.write().values_mut() {
            let c = &mut stats.counters;
            if let Some(last) = c.last_tick {
                let elapsed = now.duration_since(last).as_secs_f64();
                if elapsed > 0.0 {
                    c.speed_out = c.upload_bytes.saturating_sub(c.prev_upload) as f64 / elapsed;
                    c.speed_in =
                        c.download_bytes.saturating_sub(c.prev_download) as f64 / elapsed;
                }
            }
            c.prev_upload = c.upload_bytes;
            c.prev_download = c.download_bytes;
            c.last_tick = Some(now);
        }
    }

    /// Spawn the rate ticker. It runs until `shutdown` is cancelled.
    pub fn start_rate_ticker(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config::RATE_TICK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => store.tick_speeds(),
                }
            }
            tracing::debug!("Rate ticker stopped");
        })
    }
}

fn ensure_entry(entries: &mut HashMap<String, ServiceStats>, name: &str, mode: ServiceMode) -> bool {
    if entries.contains_key(name) {
        return false;
    }
    entries.insert(
        name.to_string(),
        ServiceStats {
            mode,
            counters: TrafficCounters::default(),
        },
    );
    tracing::debug!(service = name, ?mode, "Tracking new service");
    true
}
