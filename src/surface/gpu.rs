//! GPU-accelerated surface, reserved as an extension point.

use super::Surface;
use image::RgbaImage;

/// Placeholder for a GPU-backed drawable target. Tracks dimensions so it can
/// participate in surface switching, but performs no drawing and supports no
/// pixel readback.
pub struct GpuSurface {
    width: u32,
    height: u32,
}

impl GpuSurface {
    pub fn new() -> Self {
        Self { width: 1, height: 1 }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Default for GpuSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for GpuSurface {
    fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn reset_state(&mut self) {}

    fn snapshot(&self) -> Option<RgbaImage> {
        None
    }

    fn load_pixels(&mut self, _pixels: &RgbaImage) {}
}
