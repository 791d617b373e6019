pub mod api;
pub mod capture;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod services;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::capture::CaptureStatus;
use crate::config::{Cli, Settings};
use crate::core::{FrameClassifier, ServiceTable, StatsStore};
use crate::services::BackgroundServices;

/// Process entry point: configure, start background services, serve queries
/// until Ctrl-C, then shut everything down.
pub async fn run() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in RetroFlow: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retroflow=info,retroflow_lib=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;
    tracing::info!(
        interface = %settings.interface,
        listen = %settings.listen,
        services = settings.services.len(),
        "RetroFlow starting"
    );

    let classifier = Arc::new(FrameClassifier::new(ServiceTable::from_entries(
        &settings.services,
    )));
    tracing::debug!(ports = classifier.table().len(), "Port table loaded");
    let stats = Arc::new(StatsStore::new());
    let capture_status = Arc::new(CaptureStatus::default());
    let shutdown = CancellationToken::new();

    // Bind first: a busy port is the one startup failure that is fatal.
    let listener = api::bind(settings.listen).await?;

    let services =
        BackgroundServices::start(&settings, &classifier, &stats, &capture_status, &shutdown);

    let state = AppState {
        stats: Arc::clone(&stats),
        capture: Arc::clone(&capture_status),
    };
    let mut server = tokio::spawn(api::serve(listener, state, shutdown.clone()));

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            None
        }
        result = &mut server => Some(result),
    };

    shutdown.cancel();
    let server_result = match finished {
        Some(result) => result,
        None => server.await,
    };
    services.shutdown().await;

    server_result??;
    tracing::info!("RetroFlow stopped");
    Ok(())
}
