//! Display ranges for the live charts.
//!
//! Both axes are recomputed from the whole retained window on every batch.
//! Non-finite samples are skipped. The X range snaps to multiples of the tick
//! step so the axis does not jitter with every new point.

use crate::config::{DEFAULT_X_TICK_STEP, DEFAULT_Y_PADDING_FRACTION};
use crate::timeseries::{Sample, SampleSliceExt};

/// Smallest tick interval used when the window is narrower than one step
const MIN_TICK_STEP: f64 = 0.1;

/// Half-width added around a degenerate range
const DEGENERATE_EXPANSION: f64 = 1.0;

/// Share of the magnitude used instead when it is larger, so the expansion
/// stays representable at large values
const DEGENERATE_RELATIVE_EXPANSION: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisConfig {
    pub x_tick_step: f64,
    pub y_padding_fraction: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            x_tick_step: DEFAULT_X_TICK_STEP,
            y_padding_fraction: DEFAULT_Y_PADDING_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
    /// Tick interval, only set for the X axis
    pub tick_step: Option<f64>,
}

impl AxisRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn expand_degenerate(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        let half_width = DEGENERATE_EXPANSION.max(min.abs() * DEGENERATE_RELATIVE_EXPANSION);
        (min - half_width, max + half_width)
    } else {
        (min, max)
    }
}

/// Y range of the window padded by `padding_fraction` of its span on both sides.
///
/// `None` when the window holds no finite value.
pub fn estimate_y(points: &[Sample], padding_fraction: f64) -> Option<AxisRange> {
    let (min, max) = points.finite_bounds_y()?;
    let (min, max) = expand_degenerate(min, max);
    let pad = (max - min) * padding_fraction;
    Some(AxisRange {
        min: min - pad,
        max: max + pad,
        tick_step: None,
    })
}

/// X range of the window snapped outward to multiples of `step`.
///
/// When the snapped span is narrower than one step the tick interval shrinks
/// to a quarter of the span, never below 0.1.
pub fn estimate_x(points: &[Sample], step: f64) -> Option<AxisRange> {
    let (min, max) = points.finite_bounds_x()?;
    let (min, max) = expand_degenerate(min, max);
    let step = if step.is_finite() && step > 0.0 {
        step
    } else {
        DEFAULT_X_TICK_STEP
    };

    let min = (min / step).floor() * step;
    let max = (max / step).ceil() * step;
    let span = max - min;
    let tick_step = if span < step {
        (span / 4.0).max(MIN_TICK_STEP)
    } else {
        step
    };

    Some(AxisRange {
        min,
        max,
        tick_step: Some(tick_step),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pairs: &[(f64, f64)]) -> Vec<Sample> {
        pairs.iter().map(|&(x, y)| Sample::new(x, y)).collect()
    }

    #[test]
    fn test_y_range_padding() {
        let points = samples(&[(0.0, 10.0), (1.0, 60.0), (2.0, 110.0)]);
        let range = estimate_y(&points, 0.06).unwrap();
        assert!((range.min - 4.0).abs() < 1e-9);
        assert!((range.max - 116.0).abs() < 1e-9);
        assert_eq!(range.tick_step, None);
    }

    #[test]
    fn test_y_range_never_zero_width() {
        let points = samples(&[(0.0, 3.0), (1.0, 3.0), (2.0, 3.0)]);
        let range = estimate_y(&points, 0.06).unwrap();
        assert!(range.min < range.max);
        assert!((range.min - (2.0 - 0.12)).abs() < 1e-9);
        assert!((range.max - (4.0 + 0.12)).abs() < 1e-9);
    }

    #[test]
    fn test_flat_window_at_large_magnitude_has_width() {
        for value in [1e17, -1e17, 1e300] {
            let points = samples(&[(0.0, value), (1.0, value)]);
            let range = estimate_y(&points, 0.06).unwrap();
            assert!(range.min < range.max, "{value} gave {range:?}");
            assert!(range.contains(value));
        }

        let points = samples(&[(1e17, 0.0)]);
        let range = estimate_x(&points, 1.0).unwrap();
        assert!(range.min < range.max);
    }

    #[test]
    fn test_y_range_skips_non_finite() {
        let points = samples(&[(0.0, f64::NAN), (1.0, 1.0), (2.0, f64::INFINITY), (3.0, 2.0)]);
        let range = estimate_y(&points, 0.0).unwrap();
        assert_eq!((range.min, range.max), (1.0, 2.0));

        let nothing = samples(&[(0.0, f64::NAN)]);
        assert!(estimate_y(&nothing, 0.06).is_none());
    }

    #[test]
    fn test_x_range_snaps_to_step() {
        let points = samples(&[(0.3, 0.0), (5.1, 0.0), (7.9, 0.0)]);
        let range = estimate_x(&points, 2.0).unwrap();
        assert_eq!(range.min, 0.0);
        assert_eq!(range.max, 8.0);
        assert_eq!(range.tick_step, Some(2.0));
    }

    #[test]
    fn test_x_range_bounds_are_step_multiples_and_contain_data() {
        for offset in [-13.7, -0.01, 0.0, 0.5, 3.99, 101.25] {
            let points = samples(&[(offset, 1.0), (offset + 0.7, 1.0), (offset + 9.3, 2.0)]);
            let range = estimate_x(&points, 2.0).unwrap();
            assert_eq!((range.min / 2.0).fract(), 0.0);
            assert_eq!((range.max / 2.0).fract(), 0.0);
            for p in &points {
                assert!(range.contains(p.x), "{} outside {:?}", p.x, range);
            }
        }
    }

    #[test]
    fn test_single_point_window() {
        let points = samples(&[(3.0, 1.0)]);
        let range = estimate_x(&points, 2.0).unwrap();
        assert_eq!((range.min, range.max), (2.0, 4.0));
        assert_eq!(range.tick_step, Some(2.0));
    }

    #[test]
    fn test_narrow_window_keeps_full_step() {
        let points = samples(&[(0.25, 1.0), (0.5, 1.0)]);
        let range = estimate_x(&points, 4.0).unwrap();
        assert_eq!((range.min, range.max), (0.0, 4.0));
        assert_eq!(range.tick_step, Some(4.0));

        let single = samples(&[(0.5, 1.0)]);
        let range = estimate_x(&single, 0.5).unwrap();
        assert_eq!((range.min, range.max), (-0.5, 1.5));
        assert_eq!(range.tick_step, Some(0.5));
    }
}
