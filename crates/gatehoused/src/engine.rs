//! Frame pipeline and the engine thread that drives it.
//!
//! One frame at a time: capture, (every Kth frame) detect + match + record,
//! annotate, emit. Only a capture failure stops the loop; recognition and
//! ledger failures are logged and the next frame is pulled.

use crate::output::FrameSink;
use chrono::Duration;
use gatehouse_core::{
    Alert, Catalog, CatalogSource, Clock, CooldownRejected, EuclideanMatcher, FaceAnalyzer,
    FaceRegion, Identification, Ledger, LedgerStore, Notifier, RecordOutcome, StoreError,
    Transition,
};
use gatehouse_hw::frame::{self as hwframe, BoxStyle};
use gatehouse_hw::{CameraError, FrameSource};
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Capture(#[from] CameraError),
    #[error("recognition adapter error: {0}")]
    Analyzer(#[from] gatehouse_core::AnalyzerError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Caption drawn under a face that matched no resident.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Tunables for the per-frame decision logic.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Run recognition on every Nth frame (>= 1).
    pub frame_skip: u32,
    /// Downscale factor for detection, in (0, 1].
    pub detect_scale: f32,
    /// Accept a match only when its distance is strictly below this.
    pub match_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_skip: 10,
            detect_scale: 0.25,
            match_threshold: 0.6,
        }
    }
}

/// Counters shared between the engine thread and the D-Bus status call.
#[derive(Default)]
pub struct EngineStats {
    frames_captured: AtomicU64,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
    recognized: AtomicU64,
    unrecognized: AtomicU64,
    catalog_size: AtomicUsize,
    running: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub recognized: u64,
    pub unrecognized: u64,
    pub catalog_size: usize,
    pub running: bool,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            recognized: self.recognized.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            catalog_size: self.catalog_size.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// What the ledger did with a recognized face.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerResult {
    Applied(Transition),
    Rejected(CooldownRejected),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Recognized {
        person_id: String,
        name: String,
        distance: f32,
        ledger: LedgerResult,
    },
    Unrecognized {
        distance: Option<f32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    /// Region in full-resolution frame coordinates.
    pub region: FaceRegion,
    pub outcome: FaceOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub processed: bool,
    pub faces: Vec<FaceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedSummary {
    pub id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub loaded: usize,
    pub excluded: Vec<ExcludedSummary>,
}

/// Per-frame recognition context. Owns everything it needs; nothing global.
pub struct Pipeline<S, A, N, C> {
    catalog: Catalog,
    ledger: Ledger<S>,
    analyzer: A,
    notifier: N,
    clock: C,
    settings: PipelineSettings,
    frame_count: u64,
    stats: Arc<EngineStats>,
}

impl<S, A, N, C> Pipeline<S, A, N, C>
where
    S: LedgerStore,
    A: FaceAnalyzer,
    N: Notifier,
    C: Clock,
{
    pub fn new(
        catalog: Catalog,
        ledger: Ledger<S>,
        analyzer: A,
        notifier: N,
        clock: C,
        settings: PipelineSettings,
    ) -> Self {
        let stats = Arc::new(EngineStats::default());
        stats.catalog_size.store(catalog.len(), Ordering::Relaxed);
        Self {
            catalog,
            ledger,
            analyzer,
            notifier,
            clock,
            settings: PipelineSettings {
                frame_skip: settings.frame_skip.max(1),
                ..settings
            },
            frame_count: 0,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Rebuild the catalog from `source` using this pipeline's analyzer and swap it in.
    pub fn reload_catalog<Src>(&mut self, source: &Src) -> Result<ReloadSummary, StoreError>
    where
        Src: CatalogSource + ?Sized,
    {
        let build = Catalog::load(source, &mut self.analyzer)?;
        let summary = ReloadSummary {
            loaded: build.catalog.len(),
            excluded: build
                .excluded
                .iter()
                .map(|e| ExcludedSummary {
                    id: e.id.clone(),
                    name: e.name.clone(),
                    reason: format!("{:?}", e.reason),
                })
                .collect(),
        };
        self.catalog = build.catalog;
        self.stats
            .catalog_size
            .store(self.catalog.len(), Ordering::Relaxed);
        tracing::info!(loaded = summary.loaded, excluded = summary.excluded.len(), "catalog reloaded");
        Ok(summary)
    }

    /// Handle one captured frame in place. Skipped frames are left untouched.
    pub fn handle_frame(&mut self, image: &mut RgbImage) -> FrameReport {
        self.frame_count += 1;
        self.stats.frames_captured.fetch_add(1, Ordering::Relaxed);

        if self.frame_count % u64::from(self.settings.frame_skip) != 0 {
            return FrameReport::default();
        }
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);

        let faces = self.recognize(image);
        for face in &faces {
            let r = &face.region;
            let (style, label) = match &face.outcome {
                FaceOutcome::Recognized { name, .. } => (BoxStyle::Recognized, name.as_str()),
                FaceOutcome::Unrecognized { .. } => (BoxStyle::Unknown, UNKNOWN_LABEL),
            };
            hwframe::draw_face_box(image, r.x, r.y, r.width, r.height, style, label);
        }

        FrameReport {
            processed: true,
            faces,
        }
    }

    fn recognize(&mut self, image: &RgbImage) -> Vec<FaceReport> {
        let scale = self.settings.detect_scale;
        let small = hwframe::downscale(image, scale);

        let detections = match self.analyzer.analyze(&small) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed for frame; continuing");
                return Vec::new();
            }
        };

        let now = self.clock.now();
        let mut reports = Vec::with_capacity(detections.len());

        for detection in detections {
            let region = detection.region.scaled(1.0 / scale);
            let identification =
                self.catalog
                    .identify(&EuclideanMatcher, &detection.embedding, self.settings.match_threshold);

            let outcome = match identification {
                Identification::Accepted { person, distance } => {
                    self.stats.recognized.fetch_add(1, Ordering::Relaxed);
                    let ledger = match self.ledger.record(&self.catalog, &person.id, now) {
                        Ok(RecordOutcome::Applied { transition, .. }) => LedgerResult::Applied(transition),
                        Ok(RecordOutcome::Rejected(rejected)) => LedgerResult::Rejected(rejected),
                        Err(e) => {
                            tracing::error!(person = %person.id, error = %e, "failed to record attendance");
                            LedgerResult::Failed(e.to_string())
                        }
                    };
                    tracing::debug!(person = %person.id, label = %person.name, distance, "face recognized");
                    FaceOutcome::Recognized {
                        person_id: person.id.clone(),
                        name: person.name.clone(),
                        distance,
                        ledger,
                    }
                }
                Identification::Rejected { distance } => {
                    self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?distance, label = UNKNOWN_LABEL, "unrecognized face detected");
                    self.notifier.notify(&Alert::unrecognized(now, distance));
                    FaceOutcome::Unrecognized { distance }
                }
            };

            reports.push(FaceReport { region, outcome });
        }

        reports
    }
}

/// Requests the daemon can make of the engine thread between frames.
pub enum EngineRequest {
    ReloadCatalog {
        reply: oneshot::Sender<Result<ReloadSummary, EngineError>>,
    },
}

/// Drive the pipeline until the frame source fails.
///
/// Pending requests are served before each capture. Undecodable frames are
/// dropped. Returns the capture error that ended the loop.
pub fn run<S, A, N, C, F, O, Src>(
    pipeline: &mut Pipeline<S, A, N, C>,
    source: &mut F,
    sink: &mut O,
    catalog_source: &Src,
    requests: &mut mpsc::Receiver<EngineRequest>,
) -> EngineError
where
    S: LedgerStore,
    A: FaceAnalyzer,
    N: Notifier,
    C: Clock,
    F: FrameSource,
    O: FrameSink,
    Src: CatalogSource + ?Sized,
{
    pipeline.stats.running.store(true, Ordering::Relaxed);

    let error = loop {
        while let Ok(request) = requests.try_recv() {
            match request {
                EngineRequest::ReloadCatalog { reply } => {
                    let result = pipeline.reload_catalog(catalog_source).map_err(EngineError::from);
                    let _ = reply.send(result);
                }
            }
        }

        let mut frame = match source.capture() {
            Ok(frame) => frame,
            Err(CameraError::Decode(e)) => {
                pipeline.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "dropping undecodable frame");
                continue;
            }
            Err(e) => break e,
        };

        let report = pipeline.handle_frame(&mut frame.image);
        if report.processed {
            tracing::trace!(seq = frame.sequence, faces = report.faces.len(), "frame processed");
        }
        sink.emit(&frame.image);
    };

    pipeline.stats.running.store(false, Ordering::Relaxed);
    tracing::error!(error = %error, "capture failed; frame pipeline stopped");
    EngineError::Capture(error)
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    stats: Arc<EngineStats>,
}

impl EngineHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolves once the engine thread has exited.
    pub async fn stopped(&self) {
        self.tx.closed().await
    }

    /// Ask the engine to rebuild its catalog from the residents table.
    pub async fn reload_catalog(&self) -> Result<ReloadSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReloadCatalog { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Everything the engine thread needs, already opened and loaded.
pub struct EngineParts<S, A, N, C, F, O, Src> {
    pub pipeline: Pipeline<S, A, N, C>,
    pub source: F,
    pub sink: O,
    pub catalog_source: Src,
    pub warmup_frames: usize,
}

/// Spawn the engine on a dedicated OS thread.
pub fn spawn_engine<S, A, N, C, F, O, Src>(
    parts: EngineParts<S, A, N, C, F, O, Src>,
) -> Result<EngineHandle, EngineError>
where
    S: LedgerStore + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
    N: Notifier + Send + 'static,
    C: Clock + Send + 'static,
    F: FrameSource + Send + 'static,
    O: FrameSink + Send + 'static,
    Src: CatalogSource + Send + 'static,
{
    let EngineParts {
        mut pipeline,
        mut source,
        mut sink,
        catalog_source,
        warmup_frames,
    } = parts;

    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            match source.capture() {
                Ok(_) | Err(CameraError::Decode(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    let stats = pipeline.stats();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("gatehouse-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            run(&mut pipeline, &mut source, &mut sink, &catalog_source, &mut rx);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, stats })
}

/// Cooldown as a chrono duration. Values chrono cannot represent use the default window.
pub fn cooldown(minutes: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or_else(|| {
        tracing::warn!(minutes, "cooldown out of range; using default");
        Duration::minutes(gatehouse_core::ledger::DEFAULT_COOLDOWN_MINUTES)
    })
}
