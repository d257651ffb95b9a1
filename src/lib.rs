//! Live PPG telemetry monitor.
//!
//! Inbound messages are normalized into per-channel sample batches, kept in
//! bounded windows and pushed to a chart sink with fresh axis ranges.
//! Processed-channel charts can be composited and recorded to a video file.

pub mod axis;
pub mod charts;
pub mod compositor;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod monitor;
pub mod payload;
pub mod recorder;
pub mod sink;
pub mod timeseries;
