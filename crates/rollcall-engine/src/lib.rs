//! rollcall-engine — the real-time attendance pipeline.
//!
//! ```text
//! camera ─▶ capture ─[drop-oldest, 2]─▶ recognition ─[latest wins]─▶ publish ─▶ StreamSink
//!                                            └─▶ AttendanceSink (once per identity per run)
//! ```
//!
//! [`PipelineController`] owns the lifecycle; stages are plain structs with a
//! blocking `run` loop so they can be driven directly in tests.

pub mod capture;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod interval;
pub mod presence;
pub mod publish;
pub mod recognition;
pub mod render;
pub mod sink;
pub mod stats;

pub use config::EngineConfig;
pub use controller::{
    BackendFactory, OnnxBackendFactory, PipelineController, PipelineSettings, PipelineState,
    StartConfig, StartOutcome, StopOutcome,
};
pub use error::StartError;
pub use sink::{AttendanceSink, CsvAttendanceSink, NullStreamSink, StreamFrame, StreamSink};
pub use stats::StatsSnapshot;
