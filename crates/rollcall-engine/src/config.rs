use crate::capture::CaptureSettings;
use crate::controller::{PipelineSettings, StartConfig};
use rollcall_core::{DetectorKind, EmbedderKind, ModelSelector};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default cosine-distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.3;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Camera identifier: `/dev/videoN`, a bare index, or `stub://WxH`.
    pub camera_id: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery JSON file (identity → descriptors).
    pub gallery_path: PathBuf,
    /// Attendance CSV written by the CLI.
    pub attendance_path: PathBuf,
    /// Cosine distance strictly below which a face matches.
    pub match_threshold: f32,
    pub detector: DetectorKind,
    pub embedder: EmbedderKind,
    /// Upper bound on how long `stop()` waits for workers.
    pub stop_timeout_ms: u64,
    /// Publish worker tick.
    pub publish_interval_ms: u64,
    pub jpeg_quality: u8,
    /// TrueType font for overlay text; unset searches system font directories.
    pub font_path: Option<PathBuf>,
    /// Consecutive read failures before the camera is reported unavailable.
    pub capture_failure_ceiling: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            camera_id: "0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            gallery_path: rollcall_core::default_gallery_path(),
            attendance_path: PathBuf::from("attendance.csv"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            detector: DetectorKind::default(),
            embedder: EmbedderKind::default(),
            stop_timeout_ms: 3000,
            publish_interval_ms: 10,
            jpeg_quality: 80,
            font_path: None,
            capture_failure_ceiling: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            camera_id: std::env::var("ROLLCALL_CAMERA").unwrap_or(defaults.camera_id),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            gallery_path: std::env::var("ROLLCALL_GALLERY")
                .map(PathBuf::from)
                .unwrap_or(defaults.gallery_path),
            attendance_path: std::env::var("ROLLCALL_ATTENDANCE_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.attendance_path),
            match_threshold: env_parse("ROLLCALL_MATCH_THRESHOLD", defaults.match_threshold),
            detector: env_parse("ROLLCALL_DETECTOR", defaults.detector),
            embedder: env_parse("ROLLCALL_EMBEDDER", defaults.embedder),
            stop_timeout_ms: env_parse("ROLLCALL_STOP_TIMEOUT_MS", defaults.stop_timeout_ms),
            publish_interval_ms: env_parse("ROLLCALL_PUBLISH_INTERVAL_MS", defaults.publish_interval_ms),
            jpeg_quality: env_parse::<u8>("ROLLCALL_JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            font_path: std::env::var("ROLLCALL_FONT").ok().map(PathBuf::from),
            capture_failure_ceiling: env_parse(
                "ROLLCALL_CAPTURE_FAILURE_CEILING",
                defaults.capture_failure_ceiling,
            ),
        }
    }

    pub fn models(&self) -> ModelSelector {
        ModelSelector {
            detector: self.detector,
            embedder: self.embedder,
        }
    }

    /// Per-run parameters for [`PipelineController::start`](crate::PipelineController::start).
    pub fn start_config(&self) -> StartConfig {
        StartConfig {
            camera_id: self.camera_id.clone(),
            match_threshold: self.match_threshold,
            models: self.models(),
        }
    }

    /// Controller-wide timing and encoding parameters.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            publish_interval: Duration::from_millis(self.publish_interval_ms.max(1)),
            jpeg_quality: self.jpeg_quality,
            font_path: self.font_path.clone(),
            capture: CaptureSettings {
                failure_ceiling: self.capture_failure_ceiling.max(1),
                ..CaptureSettings::default()
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.match_threshold, 0.3);
        assert_eq!(c.detector, DetectorKind::Scrfd);
        assert_eq!(c.embedder, EmbedderKind::ArcFace);

        let s = c.pipeline_settings();
        assert_eq!(s.stop_timeout, Duration::from_secs(3));
        assert_eq!(s.publish_interval, Duration::from_millis(10));
        assert_eq!(s.jpeg_quality, 80);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("ROLLCALL_MATCH_THRESHOLD", "0.42");
        std::env::set_var("ROLLCALL_DETECTOR", "ultraface");
        std::env::set_var("ROLLCALL_JPEG_QUALITY", "not-a-number");
        let c = EngineConfig::from_env();
        std::env::remove_var("ROLLCALL_MATCH_THRESHOLD");
        std::env::remove_var("ROLLCALL_DETECTOR");
        std::env::remove_var("ROLLCALL_JPEG_QUALITY");

        assert!((c.match_threshold - 0.42).abs() < 1e-6);
        assert_eq!(c.detector, DetectorKind::UltraFace);
        assert_eq!(c.jpeg_quality, 80);
    }

    #[test]
    fn test_start_config_carries_selection() {
        let c = EngineConfig {
            camera_id: "stub://64x48".into(),
            embedder: EmbedderKind::Facenet512,
            ..EngineConfig::default()
        };
        let s = c.start_config();
        assert_eq!(s.camera_id, "stub://64x48");
        assert_eq!(s.models.embedder, EmbedderKind::Facenet512);
    }
}
