use rollcall_engine::{StreamFrame, StreamSink};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How often the result summary is logged.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(2);

/// Keeps the latest annotated frame on disk and periodically logs what is in it.
pub struct PreviewSink {
    path: Option<PathBuf>,
    last_summary: Mutex<Option<Instant>>,
}

impl PreviewSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            last_summary: Mutex::new(None),
        }
    }

    fn write_jpeg(&self, frame: &StreamFrame) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Write-then-rename so viewers never see a torn image.
        let tmp = path.with_extension("jpg.tmp");
        std::fs::write(&tmp, &frame.jpeg)?;
        std::fs::rename(&tmp, path)
    }
}

impl StreamSink for PreviewSink {
    fn on_frame(&self, frame: StreamFrame) {
        if let Err(e) = self.write_jpeg(&frame) {
            tracing::warn!(error = %e, "failed to write preview frame");
        }

        let mut last = self.last_summary.lock().unwrap_or_else(|e| e.into_inner());
        if last.is_some_and(|t| t.elapsed() < SUMMARY_INTERVAL) {
            return;
        }
        *last = Some(Instant::now());
        match serde_json::to_string(&frame) {
            Ok(json) => tracing::info!(frame = %json, "stream"),
            Err(e) => tracing::debug!(error = %e, "could not serialize frame summary"),
        }
    }
}
