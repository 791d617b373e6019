//! Shared state handed to every query handler.

use std::sync::Arc;

use crate::capture::CaptureStatus;
use crate::core::StatsStore;

#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<StatsStore>,
    /// Whether host-mode accounting is live. Stays `false` when the interface
    /// could not be opened.
    pub capture: Arc<CaptureStatus>,
}
