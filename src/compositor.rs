//! # Frame Compositor
//!
//! Stitches several independently updating surfaces into one bitmap for
//! recording.
//!
//! ## Layout
//! Sources are stacked vertically at their native resolution with a fixed gap
//! between them. The composite is as wide as the widest source and as tall as
//! all sources plus the gaps. The layout is fixed when the compositor is
//! built; a source that later renders at a different size is clipped to its
//! slot.
//!
//! Every frame starts from a solid white fill, so pixels from a previous
//! frame can never survive into the next one. A source that errors or panics
//! while rendering only blanks its own slot.

use crate::error::{CompositorError, RenderError};
use image::{imageops, Rgb, RgbImage};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// A visual that can be captured into the composite
pub trait SourceSurface: Send + Sync {
    /// Current size in pixels
    fn size(&self) -> (u32, u32);

    /// Rasterize the current contents
    fn render(&self) -> Result<RgbImage, RenderError>;

    /// Name used in log messages
    fn name(&self) -> String {
        String::from("surface")
    }
}

/// Shared handle to a source surface
pub type SurfaceHandle = Arc<dyn SourceSurface>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    y: u32,
    width: u32,
    height: u32,
}

pub struct Compositor {
    sources: Vec<SurfaceHandle>,
    slots: Vec<Slot>,
    frame: RgbImage,
    frames_drawn: u64,
}

impl Compositor {
    /// Lay out `sources` top to bottom with `padding` pixels between them.
    ///
    /// Fails with [`CompositorError::NoSources`] when there is nothing to record.
    pub fn build(sources: Vec<SurfaceHandle>, padding: u32) -> Result<Self, CompositorError> {
        if sources.is_empty() {
            return Err(CompositorError::NoSources);
        }

        let mut slots = Vec::with_capacity(sources.len());
        let mut y = 0u32;
        let mut width = 0u32;
        for (i, source) in sources.iter().enumerate() {
            if i > 0 {
                y = y.saturating_add(padding);
            }
            let (w, h) = source.size();
            slots.push(Slot { y, width: w, height: h });
            y = y.saturating_add(h);
            width = width.max(w);
        }
        let height = y;

        if width == 0 || height == 0 {
            return Err(CompositorError::EmptyLayout { width, height });
        }

        log::debug!(
            "Composite surface {}x{} from {} sources",
            width,
            height,
            sources.len()
        );

        Ok(Self {
            sources,
            slots,
            frame: RgbImage::from_pixel(width, height, BACKGROUND),
            frames_drawn: 0,
        })
    }

    /// Repaint the whole composite from the current source contents.
    ///
    /// A source that fails to render, or panics, leaves its slot blank for
    /// this frame.
    pub fn draw_frame(&mut self) -> &RgbImage {
        self.frame.pixels_mut().for_each(|p| *p = BACKGROUND);

        for (source, slot) in self.sources.iter().zip(&self.slots) {
            let image = match panic::catch_unwind(AssertUnwindSafe(|| source.render())) {
                Ok(Ok(image)) => image,
                Ok(Err(e)) => {
                    log::warn!("Skipping {} in frame {}: {}", source.name(), self.frames_drawn, e);
                    continue;
                }
                Err(_) => {
                    log::error!("{} panicked while rendering frame {}", source.name(), self.frames_drawn);
                    continue;
                }
            };

            if image.width() > slot.width || image.height() > slot.height {
                let clipped = imageops::crop_imm(
                    &image,
                    0,
                    0,
                    slot.width.min(image.width()),
                    slot.height.min(image.height()),
                )
                .to_image();
                imageops::replace(&mut self.frame, &clipped, 0, i64::from(slot.y));
            } else {
                imageops::replace(&mut self.frame, &image, 0, i64::from(slot.y));
            }
        }

        self.frames_drawn += 1;
        &self.frame
    }

    /// The most recently drawn frame
    pub fn frame(&self) -> &RgbImage {
        &self.frame
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}
