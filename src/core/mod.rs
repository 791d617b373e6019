//! Core logic: port table, frame classification, traffic accounting.
//!
//! - [`ServiceTable`] — port → service name lookup
//! - [`FrameClassifier`] — turns a frame's ports and length into credits
//! - [`StatsStore`] — per-service byte counters behind one reader/writer lock

pub mod classifier;
pub mod port_table;
pub mod traffic;

pub use classifier::{FrameClassifier, FrameSummary};
pub use port_table::ServiceTable;
pub use traffic::{Credit, Direction, ServiceMode, ServiceSnapshot, StatsStore};
