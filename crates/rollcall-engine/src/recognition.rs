//! Recognition worker: adaptive detection, matching and attendance.

use crate::interval::DetectionInterval;
use crate::presence::PresenceSet;
use crate::sink::AttendanceSink;
use crate::stats::PipelineStats;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rollcall_core::{
    BoundingBox, CosineMatcher, Detector, Embedder, Gallery, Identity, Matcher, RecognitionResult,
};
use rollcall_hw::Frame;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Detection runs on frames downscaled to this size.
pub const WORKING_WIDTH: u32 = 320;
pub const WORKING_HEIGHT: u32 = 240;
/// Pixels added around each detected box before embedding.
pub const FACE_MARGIN: i32 = 10;
/// Receive timeout, so cancellation is seen with no frames arriving.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame leaving the recognition stage.
///
/// `results` is `None` on cycles where detection did not run; the publisher
/// keeps showing the previous result set.
#[derive(Clone)]
pub struct Processed {
    pub frame: Frame,
    pub results: Option<Vec<RecognitionResult>>,
}

pub struct RecognitionStage {
    detector: Box<dyn Detector>,
    embedder: Box<dyn Embedder>,
    gallery: Arc<Gallery>,
    matcher: CosineMatcher,
    threshold: f32,
    interval: DetectionInterval,
    presence: PresenceSet,
    attendance: Arc<dyn AttendanceSink>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl RecognitionStage {
    pub fn new(
        detector: Box<dyn Detector>,
        embedder: Box<dyn Embedder>,
        gallery: Arc<Gallery>,
        threshold: f32,
        attendance: Arc<dyn AttendanceSink>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            detector,
            embedder,
            gallery,
            matcher: CosineMatcher,
            threshold,
            interval: DetectionInterval::new(),
            presence: PresenceSet::new(),
            attendance,
            stats,
            cancel,
        }
    }

    /// Consume frames until cancelled or the capture side hangs up.
    pub fn run(mut self, frames: Receiver<Frame>, out: Sender<Processed>) {
        tracing::info!(
            detector = self.detector.name(),
            embedder = self.embedder.name(),
            threshold = self.threshold,
            "recognition started"
        );

        while !self.cancel.is_cancelled() {
            let frame = match frames.recv_timeout(RECV_TIMEOUT) {
                Ok(f) => f,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let processed = self.process(frame);
            if self.cancel.is_cancelled() || out.send(processed).is_err() {
                break;
            }
        }

        tracing::info!(
            present = self.presence.len(),
            interval_ms = self.interval.current().as_millis() as u64,
            "recognition stopped"
        );
    }

    /// Run detection on `frame` if the interval says it is due.
    pub fn process(&mut self, frame: Frame) -> Processed {
        let started = Instant::now();
        if !self.interval.is_due(started) {
            return Processed {
                frame,
                results: None,
            };
        }

        self.interval.mark_run(started);
        let results = self.detect_and_match(&frame);
        let latency = started.elapsed();
        self.interval.record(latency);
        PipelineStats::incr(&self.stats.detection_cycles);
        tracing::debug!(
            faces = results.len(),
            latency_ms = latency.as_millis() as u64,
            next_interval_ms = self.interval.current().as_millis() as u64,
            "detection cycle"
        );

        Processed {
            frame,
            results: Some(results),
        }
    }

    /// Detect, embed and match every face in `frame`, marking attendance for
    /// identities seen for the first time this run.
    pub fn detect_and_match(&mut self, frame: &Frame) -> Vec<RecognitionResult> {
        let Some(small) = frame.resized(WORKING_WIDTH, WORKING_HEIGHT) else {
            tracing::warn!(width = frame.width, height = frame.height, "frame buffer size mismatch; skipped");
            return Vec::new();
        };
        let boxes = match self.detector.detect(&small.data, small.width, small.height) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; empty result set");
                return Vec::new();
            }
        };

        let scale_x = frame.width as f32 / WORKING_WIDTH as f32;
        let scale_y = frame.height as f32 / WORKING_HEIGHT as f32;
        let mut results = Vec::with_capacity(boxes.len());

        for b in boxes {
            let native = b.scaled(scale_x, scale_y);
            let Some((bbox, crop)) = face_crop(frame, native) else {
                tracing::trace!(?native, "face region empty after clamping; skipped");
                PipelineStats::incr(&self.stats.faces_skipped);
                continue;
            };

            let descriptor = match self.embedder.embed(&crop.data, crop.width, crop.height) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, ?bbox, "embedding failed; face skipped");
                    PipelineStats::incr(&self.stats.faces_skipped);
                    continue;
                }
            };

            let m = self.matcher.best_match(&descriptor, &self.gallery, self.threshold);
            if let Identity::Known(name) = &m.identity {
                self.mark_present(name);
            }
            results.push(RecognitionResult {
                bbox,
                identity: m.identity,
                confidence: m.confidence,
            });
        }

        results
    }

    fn mark_present(&mut self, identity: &str) {
        if !self.presence.mark(identity) || self.cancel.is_cancelled() {
            return;
        }
        PipelineStats::incr(&self.stats.attendance_marks);
        tracing::info!(identity, "marked present");
        self.attendance.on_recognized(identity, chrono::Local::now());
    }

    pub fn presence(&self) -> &PresenceSet {
        &self.presence
    }

    pub fn interval(&self) -> &DetectionInterval {
        &self.interval
    }
}

/// The clamped display box and the margin-padded pixel region for `native`.
fn face_crop(frame: &Frame, native: BoundingBox) -> Option<(BoundingBox, Frame)> {
    let bbox = native.clamped(frame.width, frame.height)?;
    let r = native.face_region(FACE_MARGIN, frame.width, frame.height)?;
    let crop = frame.crop(r.x1 as u32, r.y1 as u32, r.x2 as u32, r.y2 as u32)?;
    Some((bbox, crop))
}
