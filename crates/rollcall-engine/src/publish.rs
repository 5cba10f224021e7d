//! Publish worker: renders the newest frame with the latest known results.

use crate::recognition::Processed;
use crate::render::{self, Overlay};
use crate::sink::{StreamFrame, StreamSink};
use crate::stats::PipelineStats;
use crossbeam_channel::{Receiver, TryRecvError};
use rollcall_core::RecognitionResult;
use rollcall_hw::Frame;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Published-frame rate over windows of at least one second.
#[derive(Debug)]
pub struct FpsMeter {
    window_start: Instant,
    count: u32,
    fps: f32,
}

impl FpsMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            fps: 0.0,
        }
    }

    /// Count one frame at `now` and return the current estimate.
    pub fn tick(&mut self, now: Instant) -> f32 {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.count as f32 / elapsed.as_secs_f32();
            self.count = 0;
            self.window_start = now;
        }
        self.fps
    }
}

pub struct PublishSink {
    stream: Arc<dyn StreamSink>,
    overlay: Overlay,
    interval: Duration,
    jpeg_quality: u8,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    last_frame: Option<Frame>,
    last_results: Vec<RecognitionResult>,
    fps: FpsMeter,
}

impl PublishSink {
    pub fn new(
        stream: Arc<dyn StreamSink>,
        overlay: Overlay,
        interval: Duration,
        jpeg_quality: u8,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            overlay,
            interval,
            jpeg_quality,
            stats,
            cancel,
            last_frame: None,
            last_results: Vec::new(),
            fps: FpsMeter::new(Instant::now()),
        }
    }

    /// Publish on a fixed cadence until cancelled or recognition hangs up.
    /// Every tick re-renders the last known frame, new or not.
    pub fn run(mut self, handoff: Receiver<Processed>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "publish started");
        while !self.cancel.is_cancelled() {
            let (_, disconnected) = self.drain(&handoff);
            self.publish();
            if disconnected {
                break;
            }
            std::thread::sleep(self.interval);
        }
        tracing::info!("publish stopped");
    }

    /// Take everything waiting in the handoff without blocking. The newest
    /// frame wins; the newest result set seen in the batch replaces the last
    /// known one. Returns (new frame arrived, sender gone).
    pub fn drain(&mut self, handoff: &Receiver<Processed>) -> (bool, bool) {
        let mut fresh = false;
        loop {
            match handoff.try_recv() {
                Ok(p) => {
                    if let Some(results) = p.results {
                        self.last_results = results;
                    }
                    self.last_frame = Some(p.frame);
                    fresh = true;
                }
                Err(TryRecvError::Empty) => return (fresh, false),
                Err(TryRecvError::Disconnected) => return (fresh, true),
            }
        }
    }

    /// Render, encode and hand the latest frame to the stream sink.
    pub fn publish(&mut self) {
        let Some(frame) = self.last_frame.as_ref() else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        let fps = self.fps.tick(Instant::now());
        let Some(img) = self.overlay.annotate(frame, &self.last_results, fps) else {
            tracing::warn!(width = frame.width, height = frame.height, "frame buffer size mismatch; not published");
            return;
        };
        let jpeg = match render::encode_jpeg(&img, self.jpeg_quality) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "jpeg encoding failed");
                return;
            }
        };

        let out = StreamFrame {
            jpeg,
            width: frame.width,
            height: frame.height,
            results: self.last_results.clone(),
            fps,
            detected: self.last_results.len(),
            sequence: frame.sequence,
        };
        PipelineStats::incr(&self.stats.frames_published);
        self.stream.on_frame(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use rollcall_core::{BoundingBox, Identity};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<StreamFrame>>);

    impl StreamSink for Collect {
        fn on_frame(&self, frame: StreamFrame) {
            self.0.lock().unwrap().push(frame);
        }
    }

    fn frame(seq: u32) -> Frame {
        Frame::new(vec![50; 64 * 48 * 3], 64, 48, seq).unwrap()
    }

    fn one_result() -> Vec<RecognitionResult> {
        vec![RecognitionResult {
            bbox: BoundingBox::new(5, 5, 30, 30),
            identity: Identity::Known("ada".into()),
            confidence: 0.9,
        }]
    }

    fn sink(collect: Arc<Collect>) -> PublishSink {
        PublishSink::new(
            collect,
            Overlay::default(),
            Duration::from_millis(1),
            80,
            Arc::new(PipelineStats::default()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_drain_keeps_newest_frame_and_results() {
        let collect = Arc::new(Collect::default());
        let mut p = sink(collect.clone());
        let (tx, rx) = unbounded();
        tx.send(Processed { frame: frame(1), results: Some(one_result()) }).unwrap();
        tx.send(Processed { frame: frame(2), results: None }).unwrap();
        tx.send(Processed { frame: frame(3), results: None }).unwrap();

        assert_eq!(p.drain(&rx), (true, false));
        p.publish();
        let frames = collect.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 3);
        assert_eq!(frames[0].detected, 1);
        assert_eq!(frames[0].results[0].identity, Identity::Known("ada".into()));
        assert_eq!(&frames[0].jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_empty_result_set_replaces_stale_results() {
        let collect = Arc::new(Collect::default());
        let mut p = sink(collect.clone());
        let (tx, rx) = unbounded();
        tx.send(Processed { frame: frame(1), results: Some(one_result()) }).unwrap();
        p.drain(&rx);
        tx.send(Processed { frame: frame(2), results: Some(vec![]) }).unwrap();
        p.drain(&rx);
        p.publish();
        assert_eq!(collect.0.lock().unwrap()[0].detected, 0);
    }

    #[test]
    fn test_nothing_published_before_first_frame() {
        let collect = Arc::new(Collect::default());
        let mut p = sink(collect.clone());
        let (_tx, rx) = unbounded::<Processed>();
        assert_eq!(p.drain(&rx), (false, false));
        p.publish();
        assert!(collect.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_run_exits_when_handoff_closes() {
        let collect = Arc::new(Collect::default());
        let p = sink(collect.clone());
        let (tx, rx) = unbounded();
        tx.send(Processed { frame: frame(9), results: None }).unwrap();
        drop(tx);
        p.run(rx);
        assert_eq!(collect.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_last_frame_republished_every_tick() {
        let collect = Arc::new(Collect::default());
        let cancel = CancellationToken::new();
        let p = PublishSink::new(
            collect.clone(),
            Overlay::default(),
            Duration::from_millis(10),
            80,
            Arc::new(PipelineStats::default()),
            cancel.clone(),
        );
        let (tx, rx) = unbounded();
        tx.send(Processed { frame: frame(4), results: Some(one_result()) }).unwrap();

        let worker = std::thread::spawn(move || p.run(rx));
        std::thread::sleep(Duration::from_millis(150));
        cancel.cancel();
        worker.join().unwrap();
        drop(tx);

        let frames = collect.0.lock().unwrap();
        assert!(frames.len() >= 5, "only {} frames in 150 ms", frames.len());
        assert!(frames.iter().all(|f| f.sequence == 4 && f.detected == 1));
    }

    #[test]
    fn test_fps_meter() {
        let t0 = Instant::now();
        let mut m = FpsMeter::new(t0);
        for i in 1..=19 {
            assert_eq!(m.tick(t0 + Duration::from_millis(50 * i)), 0.0);
        }
        let fps = m.tick(t0 + Duration::from_secs(1));
        assert!((fps - 20.0).abs() < 1e-3);
    }
}
