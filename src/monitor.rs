//! # Live Monitor
//!
//! Context object for the live view. One inbound message is handled to
//! completion before the next:
//!
//! ```text
//! text -> normalize -> SeriesStore::append -> estimate_x / estimate_y -> ChartSink
//!                   \-> inference updates -> ProcessedChart
//! ```
//!
//! Nothing escapes message handling. Malformed or unrecognized messages are
//! logged and dropped without touching any series, and a sink failure on one
//! channel does not stop the rest of the batch.

use crate::axis::{estimate_x, estimate_y, Axis, AxisConfig};
use crate::charts::ProcessedChart;
use crate::compositor::SurfaceHandle;
use crate::config::Config;
use crate::error::{PayloadError, SinkError};
use crate::payload::{self, NormalizedBatch};
use crate::sink::ChartSink;
use crate::timeseries::{Sample, SeriesStore, KNOWN_CHANNELS};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub messages: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    pub samples: u64,
    /// Channels in a batch that no series accepted
    pub ignored_channels: u64,
    pub sink_errors: u64,
    pub inference_updates: u64,
}

pub struct Monitor<S: ChartSink> {
    store: SeriesStore,
    sink: S,
    axis: AxisConfig,
    reference_epoch_ms: f64,
    processed: BTreeMap<String, Arc<ProcessedChart>>,
    titled: BTreeSet<String>,
    stats: MonitorStats,
}

impl<S: ChartSink> Monitor<S> {
    pub fn new(store: SeriesStore, sink: S, axis: AxisConfig, reference_epoch_ms: f64) -> Self {
        Self {
            store,
            sink,
            axis,
            reference_epoch_ms,
            processed: BTreeMap::new(),
            titled: BTreeSet::new(),
            stats: MonitorStats::default(),
        }
    }

    /// Monitor with the configured store, processed charts for IR, RED and
    /// GREEN, and timestamps relative to now.
    pub fn from_config(config: &Config, sink: S) -> Self {
        let store = SeriesStore::new(
            config.window_capacity,
            config.channel_resolver(),
            config.collision_policy,
        );
        let mut monitor = Self::new(store, sink, config.axis(), payload::now_epoch_ms());
        for channel in KNOWN_CHANNELS {
            let chart = ProcessedChart::new(
                channel,
                config.processed_width,
                config.processed_height,
                config.processed_y_limits(),
            )
            .with_smoothing(config.processed_y_smooth);
            monitor.add_processed_chart(Arc::new(chart));
        }
        monitor
    }

    /// Route inference updates for `chart.channel()` to `chart`
    pub fn add_processed_chart(&mut self, chart: Arc<ProcessedChart>) {
        self.processed.insert(chart.channel().to_string(), chart);
    }

    pub fn processed_chart(&self, channel: &str) -> Option<&Arc<ProcessedChart>> {
        self.processed.get(channel)
    }

    /// Processed charts as recorder sources, in channel order
    pub fn processed_surfaces(&self) -> Vec<SurfaceHandle> {
        self.processed
            .values()
            .map(|chart| Arc::clone(chart) as SurfaceHandle)
            .collect()
    }

    /// Handle one transport message. Returns whether it was applied.
    pub fn handle_text(&mut self, text: &str) -> bool {
        self.stats.messages += 1;
        match payload::normalize_str(text, self.reference_epoch_ms) {
            Ok(batch) => {
                self.apply_batch(&batch);
                true
            }
            Err(PayloadError::Json(e)) => {
                self.stats.malformed += 1;
                log::warn!("Dropping malformed message: {}", e);
                false
            }
            Err(PayloadError::Unrecognized) => {
                self.stats.unrecognized += 1;
                log::warn!("Unhandled payload format, message dropped");
                false
            }
        }
    }

    /// Same as [`handle_text`](Self::handle_text) for an already decoded message
    pub fn handle_value(&mut self, value: &Value) -> bool {
        self.stats.messages += 1;
        match payload::normalize(value, self.reference_epoch_ms) {
            Some(batch) => {
                self.apply_batch(&batch);
                true
            }
            None => {
                self.stats.unrecognized += 1;
                log::warn!("Unhandled payload format, message dropped");
                false
            }
        }
    }

    /// Append every channel of `batch` and refresh its chart. Returns samples appended.
    pub fn apply_batch(&mut self, batch: &NormalizedBatch) -> usize {
        let mut appended = 0;

        for (index, channel) in batch.channels.iter().enumerate() {
            let points = batch.samples(index);
            if points.is_empty() {
                continue;
            }

            let Some(series) = self.store.append(channel, &points) else {
                self.stats.ignored_channels += 1;
                log::debug!("No series for channel {}, {} samples ignored", channel, points.len());
                continue;
            };
            appended += points.len();

            let window = series.make_contiguous();
            if let Err(e) = refresh_chart(&mut self.sink, channel, window, &self.axis) {
                self.stats.sink_errors += 1;
                log::warn!("{}", e);
                continue;
            }

            if !self.titled.contains(channel) {
                match self.sink.set_title(channel, channel) {
                    Ok(()) => {
                        self.titled.insert(channel.clone());
                    }
                    Err(e) => {
                        self.stats.sink_errors += 1;
                        log::warn!("{}", e);
                    }
                }
            }
        }

        for update in &batch.inference {
            match self.processed.get(&update.channel) {
                Some(chart) => {
                    chart.update(&update.signal, Some(&update.annotation));
                    self.stats.inference_updates += 1;
                }
                None => log::debug!("No processed chart for {}", update.channel),
            }
        }

        self.stats.samples += appended as u64;
        appended
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn reference_epoch_ms(&self) -> f64 {
        self.reference_epoch_ms
    }
}

/// Push the window and both axis ranges. Ranges are skipped when the window
/// holds no finite value, leaving the sink's previous range in place.
fn refresh_chart<S: ChartSink>(
    sink: &mut S,
    channel: &str,
    window: &[Sample],
    axis: &AxisConfig,
) -> Result<(), SinkError> {
    sink.set_series(channel, window)?;
    if let Some(range) = estimate_x(window, axis.x_tick_step) {
        sink.set_axis_range(channel, Axis::X, range)?;
    }
    if let Some(range) = estimate_y(window, axis.y_padding_fraction) {
        sink.set_axis_range(channel, Axis::Y, range)?;
    }
    Ok(())
}
