//! Capture worker: reads the camera and feeds the drop-oldest frame channel.

use crate::channel::DropOldestSender;
use crate::stats::PipelineStats;
use rollcall_hw::{CameraDevice, Frame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Frames between frame-rate estimates.
const FPS_SAMPLE_FRAMES: u32 = 30;

/// Retry and backoff parameters for failed device reads.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Pause after the first failed read; doubles per consecutive failure.
    pub retry_pause: Duration,
    pub max_retry_pause: Duration,
    /// Consecutive failures before the device is reported unavailable.
    pub failure_ceiling: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            retry_pause: Duration::from_millis(100),
            max_retry_pause: Duration::from_secs(1),
            failure_ceiling: 30,
        }
    }
}

/// Forward every `n`-th frame given the measured capture rate.
pub fn skip_factor(fps: f32) -> u32 {
    if fps < 10.0 {
        4
    } else if fps < 20.0 {
        3
    } else if fps < 25.0 {
        2
    } else {
        1
    }
}

/// Pause before the next read after `consecutive` failures.
pub fn retry_backoff(settings: &CaptureSettings, consecutive: u32) -> Duration {
    if consecutive >= settings.failure_ceiling {
        return settings.max_retry_pause;
    }
    let shift = consecutive.saturating_sub(1).min(16);
    settings
        .retry_pause
        .saturating_mul(1 << shift)
        .min(settings.max_retry_pause)
}

/// Owns the camera for one run.
pub struct FrameSource {
    camera: Box<dyn CameraDevice>,
    settings: CaptureSettings,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl FrameSource {
    pub fn new(
        camera: Box<dyn CameraDevice>,
        settings: CaptureSettings,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            camera,
            settings,
            stats,
            cancel,
        }
    }

    /// Capture until cancelled. The camera is released when this returns.
    pub fn run(self, out: DropOldestSender<Frame>) {
        let Self {
            mut camera,
            settings,
            stats,
            cancel,
        } = self;
        let device = camera.name().to_string();
        tracing::info!(device = %device, "capture started");

        let mut skip = 1u32;
        let mut frame_count = 0u32;
        let mut window_start = Instant::now();
        let mut consecutive_failures = 0u32;

        while !cancel.is_cancelled() {
            let frame = match camera.read_frame() {
                Ok(f) => f,
                Err(e) => {
                    consecutive_failures += 1;
                    PipelineStats::incr(&stats.capture_failures);
                    if consecutive_failures == settings.failure_ceiling {
                        tracing::error!(
                            device = %device,
                            failures = consecutive_failures,
                            error = %e,
                            "camera unavailable; retrying at reduced rate"
                        );
                    } else if consecutive_failures < settings.failure_ceiling {
                        tracing::warn!(device = %device, error = %e, "frame read failed");
                    }
                    sleep_unless_cancelled(&cancel, retry_backoff(&settings, consecutive_failures));
                    continue;
                }
            };

            if consecutive_failures > 0 {
                tracing::info!(device = %device, after = consecutive_failures, "capture recovered");
                consecutive_failures = 0;
            }
            PipelineStats::incr(&stats.frames_captured);

            frame_count += 1;
            if frame_count == FPS_SAMPLE_FRAMES {
                let elapsed = window_start.elapsed().as_secs_f32();
                let fps = if elapsed > 0.0 { FPS_SAMPLE_FRAMES as f32 / elapsed } else { f32::MAX };
                let next = skip_factor(fps);
                if next != skip {
                    tracing::debug!(fps, skip = next, "capture skip factor changed");
                }
                skip = next;
                frame_count = 0;
                window_start = Instant::now();
            }

            if frame_count % skip == 0 {
                let dropped = out.send(frame);
                if dropped > 0 {
                    PipelineStats::add(&stats.frames_dropped, dropped as u64);
                    tracing::trace!(dropped, "recognition behind; dropped oldest frame");
                }
            }
        }

        tracing::info!(device = %device, "capture stopped");
    }
}

/// Sleep for `duration`, waking early in small steps once cancelled.
fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) {
    const STEP: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STEP.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::drop_oldest;
    use rollcall_hw::CameraError;
    use std::collections::VecDeque;

    #[test]
    fn test_skip_factor_table() {
        assert_eq!(skip_factor(5.0), 4);
        assert_eq!(skip_factor(9.99), 4);
        assert_eq!(skip_factor(10.0), 3);
        assert_eq!(skip_factor(19.9), 3);
        assert_eq!(skip_factor(20.0), 2);
        assert_eq!(skip_factor(24.9), 2);
        assert_eq!(skip_factor(25.0), 1);
        assert_eq!(skip_factor(60.0), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = CaptureSettings::default();
        assert_eq!(retry_backoff(&s, 1), Duration::from_millis(100));
        assert_eq!(retry_backoff(&s, 2), Duration::from_millis(200));
        assert_eq!(retry_backoff(&s, 3), Duration::from_millis(400));
        assert_eq!(retry_backoff(&s, 5), Duration::from_secs(1));
        assert_eq!(retry_backoff(&s, 200), Duration::from_secs(1));
    }

    /// Replays scripted reads, then cancels the run.
    struct ScriptedCamera {
        script: VecDeque<Result<Frame, CameraError>>,
        cancel: CancellationToken,
    }

    impl CameraDevice for ScriptedCamera {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            match self.script.pop_front() {
                Some(r) => r,
                None => {
                    self.cancel.cancel();
                    Err(CameraError::CaptureFailed("script exhausted".into()))
                }
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn frame(seq: u32) -> Frame {
        Frame::new(vec![0; 12], 2, 2, seq).unwrap()
    }

    #[test]
    fn test_failures_are_retried_and_frames_forwarded() {
        let cancel = CancellationToken::new();
        let script = VecDeque::from(vec![
            Ok(frame(1)),
            Err(CameraError::CaptureFailed("glitch".into())),
            Ok(frame(2)),
            Ok(frame(3)),
        ]);
        let camera = ScriptedCamera {
            script,
            cancel: cancel.clone(),
        };
        let stats = Arc::new(PipelineStats::default());
        let settings = CaptureSettings {
            retry_pause: Duration::from_millis(1),
            max_retry_pause: Duration::from_millis(2),
            failure_ceiling: 3,
        };
        let (tx, rx) = drop_oldest(2);
        FrameSource::new(Box::new(camera), settings, stats.clone(), cancel).run(tx);

        let seqs: Vec<u32> = rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 3);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.capture_failures, 2);
    }

    #[test]
    fn test_keeps_retrying_past_failure_ceiling() {
        let cancel = CancellationToken::new();
        let mut script: VecDeque<Result<Frame, CameraError>> = (0..5)
            .map(|_| Err(CameraError::CaptureFailed("unplugged".into())))
            .collect();
        script.push_back(Ok(frame(7)));
        let camera = ScriptedCamera {
            script,
            cancel: cancel.clone(),
        };
        let stats = Arc::new(PipelineStats::default());
        let settings = CaptureSettings {
            retry_pause: Duration::from_millis(1),
            max_retry_pause: Duration::from_millis(40),
            failure_ceiling: 3,
        };
        assert_eq!(retry_backoff(&settings, 3), settings.max_retry_pause);
        assert_eq!(retry_backoff(&settings, 5), settings.max_retry_pause);

        let (tx, rx) = drop_oldest(2);
        let started = Instant::now();
        FrameSource::new(Box::new(camera), settings, stats.clone(), cancel).run(tx);

        // Failures 3, 4 and 5 each wait the full maximum pause
        assert!(started.elapsed() >= Duration::from_millis(120));
        let seqs: Vec<u32> = rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![7]);
        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 1);
        // Five scripted failures plus the read that ends the script
        assert_eq!(snap.capture_failures, 6);
    }

    #[test]
    fn test_exits_immediately_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let camera = ScriptedCamera {
            script: VecDeque::from(vec![Ok(frame(1))]),
            cancel: cancel.clone(),
        };
        let (tx, rx) = drop_oldest(2);
        FrameSource::new(
            Box::new(camera),
            CaptureSettings::default(),
            Arc::new(PipelineStats::default()),
            cancel,
        )
        .run(tx);
        assert!(rx.try_recv().is_err());
    }
}
