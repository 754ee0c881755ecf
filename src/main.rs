//! Cartwatch - checkout-free store tracking core
//!
//! Correlates multi-camera product detections into per-customer
//! virtual carts and settles them when the customer leaves.
//!
//! Module structure:
//! - `domain/` - Core business types (frames, events, transactions)
//! - `io/` - Frame acquisition, collaborator contracts, egress
//! - `services/` - Business logic (tracker, sessions, carts, exits)
//! - `infra/` - Infrastructure (config, metrics)

use cartwatch::domain::CameraId;
use cartwatch::infra::{Config, Metrics};
use cartwatch::io::{
    CameraOrchestrator, CsvPriceTable, FrameSource, JsonFileStore, RecordStore, ScriptedSource,
    SyntheticDetector, SyntheticIdentifier, TextReceiptRenderer, TransactionLog,
};
use cartwatch::services::{
    CheckoutPipeline, EventTracker, ExitProcessor, FrameProcessor, SessionManager,
    VirtualCartManager,
};
use clap::Parser;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Cartwatch - automated checkout tracking
#[derive(Parser, Debug)]
#[command(name = "cartwatch", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "cartwatch starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        store_id = %config.store_id(),
        cameras = %config.cameras().len(),
        exit_cameras = ?config.exit_camera_ids(),
        detection_window_ms = %config.detection_window_ms(),
        session_timeout_ms = %config.session_timeout_ms(),
        cart_timeout_ms = %config.cart_timeout_ms(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Price table (unknown products price at zero, so a missing file
    // is survivable)
    let prices = match CsvPriceTable::from_file(config.pricing_file()) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            warn!(error = %e, "price_table_unavailable");
            Arc::new(CsvPriceTable::from_pairs(&[]))
        }
    };

    // Register cameras; entries without a script replay nothing and
    // sit idle, which keeps a partial config runnable
    let mut orchestrator = CameraOrchestrator::new();
    for camera in config.cameras() {
        let source: Box<dyn FrameSource> = match &camera.script {
            Some(path) => match ScriptedSource::from_file(path) {
                Ok(source) => Box::new(source),
                Err(e) => {
                    error!(camera_id = %camera.id, error = %e, "script_load_failed");
                    continue;
                }
            },
            None => Box::new(ScriptedSource::immediate(Vec::new())),
        };
        orchestrator.add_camera(
            CameraId(camera.id.clone()),
            &camera.name,
            camera.buffer_size,
            source,
        );
    }
    orchestrator.start_all().await;
    let orchestrator = Arc::new(orchestrator);

    // Optional per-transaction record store
    let records: Option<Arc<dyn RecordStore>> =
        match config.records_dir() {
            Some(dir) => match JsonFileStore::new(dir) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "record_store_unavailable");
                    None
                }
            },
            None => None,
        };

    let exit_processor = ExitProcessor::new(
        None, // payment gateway wired in by the deployment
        Some(Arc::new(TextReceiptRenderer::new(config.store_name()))),
        TransactionLog::new(config.egress_file()),
        records,
    );

    let processor = FrameProcessor::new(
        Arc::new(SyntheticDetector),
        Some(Arc::new(SyntheticIdentifier)),
        config.confidence_threshold(),
    );

    let exit_cameras: FxHashSet<CameraId> =
        config.exit_camera_ids().into_iter().map(CameraId::from).collect();

    let metrics = Arc::new(Metrics::new());
    let pipeline = Arc::new(CheckoutPipeline::new(
        processor,
        SessionManager::new(
            config.session_timeout_ms(),
            config.session_retention_ms(),
            config.max_concurrent_sessions(),
        ),
        VirtualCartManager::new(prices, config.cart_timeout_ms()),
        EventTracker::new(
            config.detection_window_ms(),
            config.min_return_ms(),
            config.return_confidence(),
        ),
        exit_processor,
        exit_cameras,
        metrics.clone(),
    ));

    // One polling task per camera
    let poll = Duration::from_millis(config.frame_poll_ms());
    let mut camera_tasks = Vec::new();
    for camera_id in orchestrator.camera_ids().to_vec() {
        camera_tasks.push(tokio::spawn(pipeline.clone().run_camera(
            orchestrator.clone(),
            camera_id,
            poll,
            shutdown_rx.clone(),
        )));
    }

    // Periodic session/cart expiry sweep
    tokio::spawn(
        pipeline
            .clone()
            .run_cleanup(Duration::from_secs(config.cleanup_interval_secs()), shutdown_rx.clone()),
    );

    // Metrics reporter
    let reporter_pipeline = pipeline.clone();
    let reporter_orchestrator = orchestrator.clone();
    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = reporter_shutdown.changed() => break,
                _ = interval.tick() => {
                    let (active_sessions, live_carts) = {
                        let state = reporter_pipeline.state();
                        let active = state.sessions.lock().stats().active;
                        let carts = state.carts.lock().summary().carts;
                        (active, carts)
                    };
                    reporter_metrics.report(active_sessions, live_carts).log();
                    for stats in reporter_orchestrator.camera_stats() {
                        info!(
                            camera_id = %stats.camera_id,
                            name = %stats.name,
                            fps = format!("{:.1}", stats.fps),
                            produced = %stats.frames_produced,
                            dropped = %stats.frames_dropped,
                            buffered = %stats.buffered,
                            "camera_stats"
                        );
                    }
                }
            }
        }
    });

    info!("pipeline_started");

    // Handle shutdown on Ctrl+C
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    for task in camera_tasks {
        let _ = task.await;
    }

    info!("cartwatch shutdown complete");
    Ok(())
}
