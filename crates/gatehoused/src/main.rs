use anyhow::{Context, Result};
use gatehouse_core::{Catalog, Ledger, SystemClock};
use gatehouse_hw::Camera;
use gatehouse_store::SqliteStore;
use gatehouse_vision::OnnxAnalyzer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod alerts;
mod config;
mod dbus_interface;
mod engine;
mod output;

use alerts::BroadcastNotifier;
use config::{BusKind, Config};
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::{EngineParts, Pipeline, PipelineSettings};
use output::LatestFrame;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("gatehoused starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        cooldown_minutes = config.cooldown_minutes,
        frame_skip = config.frame_skip,
        "configuration loaded"
    );

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );

    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;

    // Separate connections: engine ledger, catalog reloads, D-Bus queries.
    let catalog_store = SqliteStore::open(&config.db_path).context("failed to open database")?;
    let ledger_store = SqliteStore::open(&config.db_path).context("failed to open database")?;
    let query_store = SqliteStore::open(&config.db_path).context("failed to open database")?;

    let build = Catalog::load(&catalog_store, &mut analyzer).context("failed to load residents")?;
    tracing::info!(
        residents = build.catalog.len(),
        excluded = build.excluded.len(),
        "identity catalog built"
    );

    let notifier = BroadcastNotifier::new();
    let alert_rx = notifier.subscribe();
    let latest = Arc::new(LatestFrame::default());

    let pipeline = Pipeline::new(
        build.catalog,
        Ledger::new(ledger_store, engine::cooldown(config.cooldown_minutes)),
        analyzer,
        notifier,
        SystemClock,
        PipelineSettings {
            frame_skip: config.frame_skip,
            detect_scale: config.detect_scale,
            match_threshold: config.match_threshold,
        },
    );

    let engine = engine::spawn_engine(EngineParts {
        pipeline,
        source: camera,
        sink: Arc::clone(&latest),
        catalog_source: catalog_store,
        warmup_frames: config.warmup_frames,
    })
    .context("failed to start engine")?;

    let service = AttendanceService::new(engine.clone(), query_store, latest);
    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?;
    tokio::spawn(alerts::forward_to_dbus(alert_rx, emitter));

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "gatehoused ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("gatehoused shutting down");
            Ok(())
        }
        _ = engine.stopped() => {
            anyhow::bail!("frame pipeline stopped; camera is no longer delivering frames")
        }
    }
}
