//! Live chart sink: the interface through which the monitor hands retained
//! windows, axis bounds and titles to whatever renders them.
//!
//! Two sinks ship with the crate: [`MemorySink`] keeps the latest state of
//! every chart (useful for embedding and tests) and [`LogSink`] reports
//! updates through the `log` facade for headless runs.

use crate::axis::{Axis, AxisRange};
use crate::error::SinkError;
use crate::timeseries::Sample;
use std::collections::BTreeMap;

/// Rendering collaborator for the live charts.
///
/// Every call concerns one channel; an error only affects that channel's
/// update and never aborts the rest of the batch.
pub trait ChartSink {
    fn set_series(&mut self, channel: &str, points: &[Sample]) -> Result<(), SinkError>;
    fn set_axis_range(&mut self, channel: &str, axis: Axis, range: AxisRange) -> Result<(), SinkError>;
    fn set_title(&mut self, channel: &str, text: &str) -> Result<(), SinkError>;
}

impl<S: ChartSink + ?Sized> ChartSink for Box<S> {
    fn set_series(&mut self, channel: &str, points: &[Sample]) -> Result<(), SinkError> {
        (**self).set_series(channel, points)
    }

    fn set_axis_range(&mut self, channel: &str, axis: Axis, range: AxisRange) -> Result<(), SinkError> {
        (**self).set_axis_range(channel, axis, range)
    }

    fn set_title(&mut self, channel: &str, text: &str) -> Result<(), SinkError> {
        (**self).set_title(channel, text)
    }
}

/// Last state pushed for one chart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartState {
    pub points: Vec<Sample>,
    pub x_range: Option<AxisRange>,
    pub y_range: Option<AxisRange>,
    pub title: Option<String>,
}

/// Sink that keeps the latest state of every chart in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    charts: BTreeMap<String, ChartState>,
    updates: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chart(&self, channel: &str) -> Option<&ChartState> {
        self.charts.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.charts.keys().map(String::as_str)
    }

    /// Number of `set_series` calls received
    pub fn updates(&self) -> usize {
        self.updates
    }
}

impl ChartSink for MemorySink {
    fn set_series(&mut self, channel: &str, points: &[Sample]) -> Result<(), SinkError> {
        self.updates += 1;
        self.charts.entry(channel.to_string()).or_default().points = points.to_vec();
        Ok(())
    }

    fn set_axis_range(&mut self, channel: &str, axis: Axis, range: AxisRange) -> Result<(), SinkError> {
        let chart = self.charts.entry(channel.to_string()).or_default();
        match axis {
            Axis::X => chart.x_range = Some(range),
            Axis::Y => chart.y_range = Some(range),
        }
        Ok(())
    }

    fn set_title(&mut self, channel: &str, text: &str) -> Result<(), SinkError> {
        self.charts.entry(channel.to_string()).or_default().title = Some(text.to_string());
        Ok(())
    }
}

/// Sink that only logs what it would draw
#[derive(Debug, Default)]
pub struct LogSink;

impl ChartSink for LogSink {
    fn set_series(&mut self, channel: &str, points: &[Sample]) -> Result<(), SinkError> {
        if let Some(last) = points.last() {
            log::debug!(
                "{}: {} points, latest ({:.3}s, {})",
                channel,
                points.len(),
                last.x,
                last.y
            );
        }
        Ok(())
    }

    fn set_axis_range(&mut self, channel: &str, axis: Axis, range: AxisRange) -> Result<(), SinkError> {
        log::trace!("{}: {:?} axis {:.3}..{:.3}", channel, axis, range.min, range.max);
        Ok(())
    }

    fn set_title(&mut self, channel: &str, text: &str) -> Result<(), SinkError> {
        log::info!("Chart {} titled \"{}\"", channel, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_latest_state() {
        let mut sink = MemorySink::new();
        sink.set_series("RED", &[Sample::new(0.0, 1.0)]).unwrap();
        sink.set_series("RED", &[Sample::new(1.0, 2.0), Sample::new(2.0, 3.0)]).unwrap();
        sink.set_axis_range(
            "RED",
            Axis::Y,
            AxisRange {
                min: 0.0,
                max: 4.0,
                tick_step: None,
            },
        )
        .unwrap();
        sink.set_title("RED", "RED").unwrap();

        let chart = sink.chart("RED").unwrap();
        assert_eq!(chart.points.len(), 2);
        assert_eq!(chart.y_range.unwrap().max, 4.0);
        assert!(chart.x_range.is_none());
        assert_eq!(chart.title.as_deref(), Some("RED"));
        assert_eq!(sink.updates(), 2);
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<MemorySink> = Box::default();
        ChartSink::set_title(&mut sink, "IR", "infrared").unwrap();
        assert_eq!(sink.chart("IR").unwrap().title.as_deref(), Some("infrared"));
    }
}
