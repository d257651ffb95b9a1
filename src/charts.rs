//! Processed-channel charts.
//!
//! Each [`ProcessedChart`] holds the latest processed signal of one channel
//! together with its inference title and rasterizes it on demand with the
//! plotters bitmap backend. The recorder composites these surfaces into
//! video frames.
//!
//! Chart text uses the bundled DejaVu Sans, registered with plotters as
//! `sans-serif` before the first render.

use crate::axis::estimate_y;
use crate::compositor::SourceSurface;
use crate::error::RenderError;
use crate::payload::InferenceAnnotation;
use crate::timeseries::Sample;
use image::RgbImage;
use plotters::backend::BitMapBackend;
use plotters::chart::ChartBuilder;
use plotters::drawing::IntoDrawingArea;
use plotters::series::LineSeries;
use plotters::style::{register_font, FontStyle, RGBColor, BLUE, WHITE};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Padding fraction around the estimated Y range of a processed signal
const PROCESSED_Y_PADDING: f64 = 0.12;

const GRID_COLOR: RGBColor = RGBColor(230, 230, 230);
const AXIS_COLOR: RGBColor = RGBColor(60, 60, 60);

const FONT_FAMILY: &str = "sans-serif";
static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
static FONT_REGISTERED: OnceLock<bool> = OnceLock::new();

/// Register the bundled chart font. Only the first call does any work.
///
/// Returns false when the font could not be registered, in which case every
/// chart render fails with [`RenderError::FontUnavailable`].
pub fn register_chart_font() -> bool {
    *FONT_REGISTERED.get_or_init(|| match register_font(FONT_FAMILY, FontStyle::Normal, FONT_DATA) {
        Ok(()) => {
            log::debug!("Registered chart font as {}", FONT_FAMILY);
            true
        }
        Err(_) => {
            log::error!("Bundled chart font could not be parsed");
            false
        }
    })
}

#[derive(Debug, Default)]
struct ChartView {
    signal: Vec<f64>,
    title: String,
    y_limits: Option<(f64, f64)>,
    updates: u64,
}

pub struct ProcessedChart {
    channel: String,
    width: u32,
    height: u32,
    fixed_limits: Option<(f64, f64)>,
    y_smooth: f64,
    view: Mutex<ChartView>,
}

impl ProcessedChart {
    /// Create an empty chart. `y_limits` pins the Y axis when `min < max`.
    pub fn new(channel: &str, width: u32, height: u32, y_limits: Option<(f64, f64)>) -> Self {
        let fixed_limits = y_limits.filter(|(min, max)| min.is_finite() && max.is_finite() && min < max);
        Self {
            channel: channel.to_string(),
            width,
            height,
            fixed_limits,
            y_smooth: 0.0,
            view: Mutex::new(ChartView {
                title: channel.to_string(),
                ..ChartView::default()
            }),
        }
    }

    /// Exponential smoothing factor for dynamic Y limits, clamped to `[0, 1]`
    pub fn with_smoothing(mut self, y_smooth: f64) -> Self {
        self.y_smooth = if y_smooth.is_finite() { y_smooth.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    fn view(&self) -> MutexGuard<'_, ChartView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the displayed signal and title.
    pub fn update(&self, signal: &[f64], annotation: Option<&InferenceAnnotation>) {
        let mut view = self.view();
        view.signal = signal.to_vec();
        view.title = match annotation {
            Some(annotation) => annotation.title_for(&self.channel),
            None => self.channel.clone(),
        };
        view.updates += 1;

        if self.fixed_limits.is_some() {
            return;
        }

        let samples: Vec<Sample> = signal
            .iter()
            .enumerate()
            .map(|(i, &y)| Sample::new(i as f64, y))
            .collect();
        if let Some(range) = estimate_y(&samples, PROCESSED_Y_PADDING) {
            view.y_limits = Some(smooth_limits(view.y_limits, (range.min, range.max), self.y_smooth));
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn title(&self) -> String {
        self.view().title.clone()
    }

    /// Y limits the next render will use
    pub fn y_limits(&self) -> Option<(f64, f64)> {
        self.fixed_limits.or(self.view().y_limits)
    }

    pub fn updates(&self) -> u64 {
        self.view().updates
    }
}

/// Blend the previous limits toward `current`. An `alpha` of 0 takes `current` as is.
fn smooth_limits(previous: Option<(f64, f64)>, current: (f64, f64), alpha: f64) -> (f64, f64) {
    let (prev_min, prev_max) = match previous {
        Some(previous) if alpha > 0.0 => previous,
        _ => return current,
    };

    let min = prev_min * (1.0 - alpha) + current.0 * alpha;
    let max = prev_max * (1.0 - alpha) + current.1 * alpha;
    if min == max {
        (min - 1.0, max + 1.0)
    } else {
        (min, max)
    }
}

impl SourceSurface for ProcessedChart {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&self) -> Result<RgbImage, RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::EmptySurface);
        }
        if !register_chart_font() {
            return Err(RenderError::FontUnavailable);
        }

        let (signal, title, limits) = {
            let view = self.view();
            (view.signal.clone(), view.title.clone(), self.fixed_limits.or(view.y_limits))
        };
        let (y_min, y_max) = limits.unwrap_or((-1.0, 1.0));
        let x_max = signal.len().saturating_sub(1).max(1) as f64;

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height)).into_drawing_area();
            root.fill(&WHITE)?;

            let mut chart = ChartBuilder::on(&root)
                .margin(10)
                .caption(title.as_str(), (FONT_FAMILY, 18))
                .x_label_area_size(20)
                .y_label_area_size(40)
                .build_cartesian_2d(0f64..x_max, y_min..y_max)?;

            chart
                .configure_mesh()
                .light_line_style(GRID_COLOR)
                .axis_style(AXIS_COLOR)
                .draw()?;

            chart.draw_series(LineSeries::new(
                signal
                    .iter()
                    .enumerate()
                    .filter(|(_, y)| y.is_finite())
                    .map(|(i, &y)| (i as f64, y)),
                &BLUE,
            ))?;

            root.present()?;
        }

        RgbImage::from_raw(self.width, self.height, buffer).ok_or(RenderError::EmptySurface)
    }

    fn name(&self) -> String {
        format!("{} chart", self.channel)
    }
}
