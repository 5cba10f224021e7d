//! Pipeline lifecycle: `Idle → Running → Stopping → Idle`.
//!
//! A run owns three named OS threads (capture, recognition, publish) wired
//! by a drop-oldest frame channel and a latest-wins handoff. Each worker
//! holds a clone of an exit sender; when all clones are gone every worker has
//! returned, which lets `stop()` wait with a deadline instead of joining
//! blindly.

use crate::capture::{CaptureSettings, FrameSource};
use crate::channel::{drop_oldest, FRAME_CHANNEL_CAPACITY};
use crate::error::StartError;
use crate::publish::PublishSink;
use crate::recognition::RecognitionStage;
use crate::render::Overlay;
use crate::sink::{AttendanceSink, StreamSink};
use crate::stats::{PipelineStats, StatsSnapshot};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rollcall_core::{
    Detector, DetectorError, DetectorKind, Embedder, EmbedderKind, Gallery, GalleryError,
    ModelSelector, RecognizerError,
};
use rollcall_hw::{CameraDevice, CameraError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle state of a [`PipelineController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
        })
    }
}

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct StartConfig {
    pub camera_id: String,
    pub match_threshold: f32,
    pub models: ModelSelector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is already active (running or stopping); nothing was changed.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// No run was active.
    NotRunning,
}

/// Controller-wide timing and encoding parameters.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stop_timeout: Duration,
    pub publish_interval: Duration,
    pub jpeg_quality: u8,
    /// Overlay font; `None` searches the usual system locations.
    pub font_path: Option<PathBuf>,
    pub capture: CaptureSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(3),
            publish_interval: Duration::from_millis(10),
            jpeg_quality: 80,
            font_path: None,
            capture: CaptureSettings::default(),
        }
    }
}

/// Everything a run needs from the outside world.
pub trait BackendFactory: Send + Sync {
    fn load_gallery(&self) -> Result<Gallery, GalleryError>;
    fn open_camera(&self, camera_id: &str) -> Result<Box<dyn CameraDevice>, CameraError>;
    fn detector(&self, kind: DetectorKind) -> Result<Box<dyn Detector>, DetectorError>;
    fn embedder(&self, kind: EmbedderKind) -> Result<Box<dyn Embedder>, RecognizerError>;
}

/// ONNX models from a directory, a JSON gallery file, and V4L2 / synthetic cameras.
pub struct OnnxBackendFactory {
    pub model_dir: PathBuf,
    pub gallery_path: PathBuf,
}

impl OnnxBackendFactory {
    pub fn new(model_dir: PathBuf, gallery_path: PathBuf) -> Self {
        Self {
            model_dir,
            gallery_path,
        }
    }
}

impl BackendFactory for OnnxBackendFactory {
    fn load_gallery(&self) -> Result<Gallery, GalleryError> {
        Gallery::load(&self.gallery_path)
    }

    fn open_camera(&self, camera_id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
        rollcall_hw::open(camera_id)
    }

    fn detector(&self, kind: DetectorKind) -> Result<Box<dyn Detector>, DetectorError> {
        rollcall_core::load_detector(kind, &self.model_dir)
    }

    fn embedder(&self, kind: EmbedderKind) -> Result<Box<dyn Embedder>, RecognizerError> {
        rollcall_core::load_embedder(kind, &self.model_dir)
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Handles to one active run.
struct Run {
    id: Uuid,
    started_at: DateTime<Local>,
    cancel: CancellationToken,
    /// Disconnects once every worker has returned.
    exited: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

struct Inner {
    run: Option<Run>,
    last_stats: StatsSnapshot,
}

/// Owns the pipeline state and its workers. There is no global instance.
pub struct PipelineController {
    factory: Arc<dyn BackendFactory>,
    attendance: Arc<dyn AttendanceSink>,
    stream: Arc<dyn StreamSink>,
    settings: PipelineSettings,
    overlay: Overlay,
    /// Serialises start and stop; held by `start` for its whole duration.
    inner: Mutex<Inner>,
    /// Only written while `inner` is held, never held for long.
    state: Mutex<PipelineState>,
}

impl PipelineController {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        attendance: Arc<dyn AttendanceSink>,
        stream: Arc<dyn StreamSink>,
        settings: PipelineSettings,
    ) -> Self {
        let overlay = Overlay::load(settings.font_path.as_deref());
        Self {
            factory,
            attendance,
            stream,
            settings,
            overlay,
            inner: Mutex::new(Inner {
                run: None,
                last_stats: StatsSnapshot::default(),
            }),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lifecycle state. Never waits on a `start` that is still
    /// loading models or opening the camera; that run reports `Idle` until
    /// its workers are up.
    pub fn status(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: PipelineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Identifier of the active run, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        self.lock().run.as_ref().map(|r| r.id)
    }

    /// Counters for the active run, or the most recent one. Waits for an
    /// in-progress `start`.
    pub fn stats(&self) -> StatsSnapshot {
        let inner = self.lock();
        match &inner.run {
            Some(run) => run.stats.snapshot(),
            None => inner.last_stats,
        }
    }

    /// Start a run. Fails fast, leaving the pipeline idle, if the gallery,
    /// the models or the camera cannot be loaded.
    pub fn start(&self, config: StartConfig) -> Result<StartOutcome, StartError> {
        let mut inner = self.lock();
        let state = self.status();
        if state != PipelineState::Idle {
            tracing::info!(%state, "start ignored; pipeline already active");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let id = Uuid::new_v4();
        let span = tracing::info_span!("run", id = %id);
        let _entered = span.enter();

        let gallery = self.factory.load_gallery()?;
        if gallery.is_empty() {
            return Err(StartError::GalleryEmpty);
        }
        let detector = self.factory.detector(config.models.detector)?;
        let embedder = self.factory.embedder(config.models.embedder)?;
        if gallery.dimension() != embedder.dimension() {
            return Err(StartError::DimensionMismatch {
                gallery: gallery.dimension(),
                embedder: embedder.dimension(),
            });
        }
        let camera = self.factory.open_camera(&config.camera_id)?;
        let (width, height) = camera.resolution();
        tracing::info!(
            camera = camera.name(),
            width,
            height,
            detector = %config.models.detector,
            embedder = %config.models.embedder,
            identities = gallery.len(),
            threshold = config.match_threshold,
            "starting pipeline"
        );

        let cancel = CancellationToken::new();
        let stats = Arc::new(PipelineStats::default());
        let (frame_tx, frame_rx) = drop_oldest(FRAME_CHANNEL_CAPACITY);
        let (handoff_tx, handoff_rx) = crossbeam_channel::unbounded();
        let (exit_tx, exited) = crossbeam_channel::bounded::<()>(0);

        let source = FrameSource::new(camera, self.settings.capture, stats.clone(), cancel.clone());
        let recognition = RecognitionStage::new(
            detector,
            embedder,
            Arc::new(gallery),
            config.match_threshold,
            self.attendance.clone(),
            stats.clone(),
            cancel.clone(),
        );
        let publish = PublishSink::new(
            self.stream.clone(),
            self.overlay.clone(),
            self.settings.publish_interval,
            self.settings.jpeg_quality,
            stats.clone(),
            cancel.clone(),
        );

        let capture: Job = Box::new(move || source.run(frame_tx));
        let recognize: Job = Box::new(move || recognition.run(frame_rx, handoff_tx));
        let stream: Job = Box::new(move || publish.run(handoff_rx));
        let jobs = [
            ("rollcall-capture", capture),
            ("rollcall-recognition", recognize),
            ("rollcall-publish", stream),
        ];
        let mut workers = Vec::with_capacity(jobs.len());
        for (name, job) in jobs {
            match spawn_worker(name, &span, &exit_tx, job) {
                Ok(h) => workers.push(h),
                Err(e) => {
                    // Whatever did start sees the token and winds down on its own.
                    cancel.cancel();
                    return Err(StartError::Spawn(e));
                }
            }
        }
        drop(exit_tx);

        inner.run = Some(Run {
            id,
            started_at: Local::now(),
            cancel,
            exited,
            workers,
            stats,
        });
        self.set_state(PipelineState::Running);
        tracing::info!("pipeline running");
        Ok(StartOutcome::Started)
    }

    /// Stop the active run. Waits at most the configured stop timeout for the
    /// workers; no attendance or stream callbacks are delivered once the
    /// cancellation has been observed.
    pub fn stop(&self) -> StopOutcome {
        let run = {
            let mut inner = self.lock();
            if self.status() != PipelineState::Running {
                return StopOutcome::NotRunning;
            }
            let Some(run) = inner.run.take() else {
                self.set_state(PipelineState::Idle);
                return StopOutcome::NotRunning;
            };
            self.set_state(PipelineState::Stopping);
            run
        };

        let span = tracing::info_span!("run", id = %run.id);
        let _entered = span.enter();
        tracing::info!("stopping pipeline");
        run.cancel.cancel();

        let deadline = Instant::now() + self.settings.stop_timeout;
        let all_exited = loop {
            match run.exited.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
            }
        };

        if all_exited {
            for worker in run.workers {
                let name = worker.thread().name().unwrap_or("worker").to_string();
                if worker.join().is_err() {
                    tracing::warn!(worker = %name, "worker panicked");
                }
            }
        } else {
            let lingering: Vec<String> = run
                .workers
                .iter()
                .filter(|w| !w.is_finished())
                .filter_map(|w| w.thread().name().map(str::to_string))
                .collect();
            tracing::warn!(
                timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                ?lingering,
                "workers did not exit in time; detaching"
            );
        }

        let snapshot = run.stats.snapshot();
        let elapsed = Local::now().signed_duration_since(run.started_at);
        tracing::info!(
            seconds = elapsed.num_seconds(),
            frames = snapshot.frames_captured,
            detections = snapshot.detection_cycles,
            marked = snapshot.attendance_marks,
            "pipeline stopped"
        );

        let mut inner = self.lock();
        inner.last_stats = snapshot;
        self.set_state(PipelineState::Idle);
        StopOutcome::Stopped
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a named worker that runs inside the run's span and drops its exit
/// sender clone when it returns, panics included.
fn spawn_worker<F>(
    name: &str,
    span: &tracing::Span,
    exit: &Sender<()>,
    work: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let span = span.clone();
    let exit = exit.clone();
    std::thread::Builder::new().name(name.to_string()).spawn(move || {
        let _exit = exit;
        let _entered = span.entered();
        work();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(PipelineState::Stopping.to_string(), "stopping");
        assert_eq!(serde_json::to_string(&PipelineState::Running).unwrap(), "\"running\"");
    }

    #[test]
    fn test_default_settings() {
        let s = PipelineSettings::default();
        assert_eq!(s.stop_timeout, Duration::from_secs(3));
        assert_eq!(s.jpeg_quality, 80);
    }
}
