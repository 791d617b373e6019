//! Discovery of isolated-network services through a container inventory.
//!
//! A low-rate poll loop: every sweep lists running units and materializes an
//! [`ServiceMode::Isolated`] entry for each one that does not share the host
//! network. Sweeps only register services; isolated traffic is not measured,
//! so those counters stay at zero.

pub mod docker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{ServiceMode, StatsStore};
use crate::error::AppError;

pub use docker::DockerInventory;

/// One running unit as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    /// `true` when the unit shares the host's network namespace.
    pub host_network: bool,
}

/// Pull-based listing of running units.
pub trait Inventory: Send + Sync + 'static {
    fn list_units(&self) -> impl Future<Output = Result<Vec<Unit>, AppError>> + Send;
}

/// Periodic sweep over an [`Inventory`].
pub struct DiscoveryMonitor<I> {
    inventory: I,
    stats: Arc<StatsStore>,
    interval: Duration,
}

impl<I: Inventory> DiscoveryMonitor<I> {
    pub fn new(inventory: I, stats: Arc<StatsStore>, interval: Duration) -> Self {
        Self {
            inventory,
            stats,
            interval,
        }
    }

    /// Run one sweep. Returns the number of newly registered services.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        let units = self.inventory.list_units().await?;
        let mut added = 0;
        for unit in units.iter().filter(|u| !u.host_network) {
            if self.stats.ensure(&unit.name, ServiceMode::Isolated) {
                tracing::info!(service = %unit.name, "Discovered isolated service");
                added += 1;
            }
        }
        Ok(added)
    }

    /// Spawn the poll loop. A failed sweep is logged and retried on the next
    /// tick; the loop runs until `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = self.interval.as_secs(), "Discovery monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!("Discovery sweep failed: {e}");
                        }
                    }
                }
            }
            tracing::debug!("Discovery monitor stopped");
        })
    }
}
