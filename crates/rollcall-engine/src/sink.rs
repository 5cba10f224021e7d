//! Downstream consumers: attendance marking and the annotated frame stream.

use chrono::{DateTime, Local};
use rollcall_core::RecognitionResult;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CSV_HEADER: &str = "Name,Time";
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives one call per identity per run, the first time it is recognized.
pub trait AttendanceSink: Send + Sync {
    fn on_recognized(&self, identity: &str, at: DateTime<Local>);
}

/// Receives every published frame.
pub trait StreamSink: Send + Sync {
    fn on_frame(&self, frame: StreamFrame);
}

/// One annotated frame as handed to a [`StreamSink`].
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    /// JPEG-encoded frame with overlays drawn in.
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Latest known results; may be older than the frame.
    pub results: Vec<RecognitionResult>,
    /// Published frames per second, measured over ~1 s windows.
    pub fps: f32,
    /// Faces in `results`.
    pub detected: usize,
    pub sequence: u32,
}

/// Discards every frame.
pub struct NullStreamSink;

impl StreamSink for NullStreamSink {
    fn on_frame(&self, _frame: StreamFrame) {}
}

/// Appends `Name,Time` rows to a CSV file.
pub struct CsvAttendanceSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvAttendanceSink {
    /// Create the file with its header row unless it already exists.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            std::fs::write(path, format!("{CSV_HEADER}\n"))?;
            tracing::info!(path = %path.display(), "attendance file created");
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, identity: &str, at: DateTime<Local>) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        writeln!(file, "{},{}", csv_field(identity), at.format(CSV_TIME_FORMAT))
    }
}

impl AttendanceSink for CsvAttendanceSink {
    fn on_recognized(&self, identity: &str, at: DateTime<Local>) {
        match self.append(identity, at) {
            Ok(()) => tracing::info!(identity, path = %self.path.display(), "attendance recorded"),
            Err(e) => tracing::warn!(identity, error = %e, "failed to write attendance row"),
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
