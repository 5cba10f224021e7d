use std::sync::atomic::{AtomicU64, Ordering};

/// Per-run pipeline counters, updated by the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub capture_failures: AtomicU64,
    pub detection_cycles: AtomicU64,
    pub faces_skipped: AtomicU64,
    pub attendance_marks: AtomicU64,
    pub frames_published: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detection_cycles: self.detection_cycles.load(Ordering::Relaxed),
            faces_skipped: self.faces_skipped.load(Ordering::Relaxed),
            attendance_marks: self.attendance_marks.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub capture_failures: u64,
    pub detection_cycles: u64,
    pub faces_skipped: u64,
    pub attendance_marks: u64,
    pub frames_published: u64,
}
