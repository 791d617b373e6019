//! Snapshot and liveness handlers.

use axum::extract::State;
use axum::Json;

use crate::core::ServiceSnapshot;
use crate::error::AppError;

use super::state::AppState;

/// Returns the current snapshot for every known service, ordered by name.
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceSnapshot>>, AppError> {
    Ok(Json(state.stats.snapshot()))
}

pub async fn index(State(state): State<AppState>) -> String {
    let capture = if state.capture.is_active() {
        "capture active"
    } else {
        "capture unavailable"
    };
    format!(
        "RetroFlow running: {} services tracked, {capture}\n",
        state.stats.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::capture::CaptureStatus;
    use crate::core::{Credit, Direction, ServiceMode, StatsStore};

    fn state() -> AppState {
        AppState {
            stats: Arc::new(StatsStore::new()),
            capture: Arc::new(CaptureStatus::default()),
        }
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_list() {
        let Json(list) = get_stats(State(state())).await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_stats_lists_host_and_isolated_services() {
        let state = state();
        state.stats.ensure("nextcloud", ServiceMode::Isolated);
        state.stats.record_frame(&[
            Credit {
                service: "web",
                direction: Direction::Download,
                amount: 100,
            },
            Credit {
                service: "web",
                direction: Direction::Upload,
                amount: 50,
            },
        ]);

        let Json(list) = get_stats(State(state)).await.unwrap();
        assert_eq!(list.len(), 2);

        let web = list.iter().find(|s| s.name == "web").unwrap();
        assert_eq!((web.download_bytes, web.upload_bytes), (100, 50));
        assert_eq!(web.mode, ServiceMode::Host);

        let cloud = list.iter().find(|s| s.name == "nextcloud").unwrap();
        assert_eq!(cloud.mode, ServiceMode::Isolated);
    }

    #[tokio::test]
    async fn test_index_reports_degraded_capture() {
        let state = state();
        state.stats.ensure("nextcloud", ServiceMode::Isolated);
        let body = index(State(state)).await;
        assert_eq!(body, "RetroFlow running: 1 services tracked, capture unavailable\n");
    }
}
