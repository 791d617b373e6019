//! Background service lifecycle management.
//!
//! `BackgroundServices` owns every long-lived task spawned at startup, starts
//! them in dependency order and stops them through one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureEngine, CaptureStatus};
use crate::config::{self, Settings};
use crate::core::{FrameClassifier, StatsStore};
use crate::discovery::{DiscoveryMonitor, DockerInventory};

/// Manages all background work spawned during startup.
///
/// Started in dependency order:
/// 1. Capture engine (host-mode accounting; optional)
/// 2. Rate ticker (1s speed derivation)
/// 3. Discovery monitor (isolated-mode registration; optional)
pub struct BackgroundServices {
    shutdown: CancellationToken,
    capture: Option<CaptureEngine>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundServices {
    /// Start all background services. Must be called inside a tokio runtime.
    ///
    /// Neither an unavailable interface nor an unreachable inventory is fatal:
    /// the process keeps serving whatever the remaining services produce.
    pub fn start(
        settings: &Settings,
        classifier: &Arc<FrameClassifier>,
        stats: &Arc<StatsStore>,
        capture_status: &Arc<CaptureStatus>,
        shutdown: &CancellationToken,
    ) -> Self {
        // 1. Capture engine.
        let capture = match CaptureEngine::start(
            settings,
            Arc::clone(classifier),
            Arc::clone(stats),
            Arc::clone(capture_status),
            shutdown.clone(),
        ) {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::warn!(
                    "Packet capture unavailable: {e}. Running without host-mode accounting."
                );
                None
            }
        };

        let mut tasks = Vec::new();

        // 2. Rate ticker.
        tasks.push(("rate-ticker", stats.start_rate_ticker(shutdown.clone())));

        // 3. Discovery monitor.
        if settings.discovery.enabled {
            match DockerInventory::connect() {
                Ok(inventory) => {
                    let monitor = DiscoveryMonitor::new(
                        inventory,
                        Arc::clone(stats),
                        Duration::from_secs(settings.discovery.interval_secs),
                    );
                    tasks.push(("discovery", monitor.start(shutdown.clone())));
                }
                Err(e) => {
                    tracing::warn!("Container discovery unavailable: {e}");
                }
            }
        } else {
            tracing::info!("Container discovery disabled by configuration");
        }

        Self {
            shutdown: shutdown.clone(),
            capture,
            tasks,
        }
    }

    pub fn capture_started(&self) -> bool {
        self.capture.is_some()
    }

    /// Cancel everything and wait for each task, up to the grace period.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let grace = Duration::from_secs(config::SHUTDOWN_GRACE_SECS);

        for (name, handle) in self.tasks {
            wait_for_task(name, handle, grace).await;
        }

        if let Some(engine) = self.capture {
            let join = tokio::task::spawn_blocking(move || engine.join());
            wait_for_task("capture", join, grace).await;
        }
    }
}

/// Await one task for up to `grace`. Returns `true` if it finished cleanly.
async fn wait_for_task(name: &str, handle: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("{name} task failed: {e}");
            false
        }
        Err(_) => {
            tracing::warn!("{name} task did not stop within {grace:?}");
            false
        }
    }
}
