//! Port-based attribution of captured frames to configured services.
//!
//! Direction is inferred from port identity alone: a frame addressed to a
//! configured port is inbound to that service, a frame sent from one is
//! outbound. Both checks run on every frame, so traffic between two configured
//! services (or a coincidental ephemeral port) credits both sides.

use crate::core::port_table::ServiceTable;
use crate::core::traffic::{Credit, Direction, StatsStore};

/// Transport header fields the classifier consults, plus the byte count to credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u64,
}

pub struct FrameClassifier {
    table: ServiceTable,
}

impl FrameClassifier {
    pub fn new(table: ServiceTable) -> Self {
        Self { table }
    }

    /// Zero, one or two credits for a frame. Download is listed first.
    pub fn classify(&self, frame: &FrameSummary) -> Vec<Credit<'_>> {
        let mut credits = Vec::with_capacity(2);
        if let Some(service) = self.table.lookup(frame.dst_port) {
            credits.push(Credit {
                service,
                direction: Direction::Download,
                amount: frame.length,
            });
        }
        if let Some(service) = self.table.lookup(frame.src_port) {
            credits.push(Credit {
                service,
                direction: Direction::Upload,
                amount: frame.length,
            });
        }
        credits
    }

    /// Classify and apply in one step. Returns `true` if anything was credited.
    pub fn account(&self, frame: &FrameSummary, store: &StatsStore) -> bool {
        let credits = self.classify(frame);
        store.record_frame(&credits);
        !credits.is_empty()
    }

    pub fn table(&self) -> &ServiceTable {
        &self.table
    }
}
