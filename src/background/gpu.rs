//! GPU matte pipeline, reserved as an extension point.

use super::{MattePipeline, RenderSettings, VirtualBackground};
use crate::segmentation::SegmentationResult;
use crate::surface::SurfaceManager;
use image::RgbaImage;

/// Placeholder for a GPU-accelerated compositing pipeline. Registered so it
/// can be selected and configured, but performs no drawing.
pub struct GpuMattePipeline {
    settings: RenderSettings,
}

impl GpuMattePipeline {
    pub fn new() -> Self {
        Self {
            settings: RenderSettings::default(),
        }
    }
}

impl Default for GpuMattePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MattePipeline for GpuMattePipeline {
    fn render_settings(&self) -> RenderSettings {
        self.settings
    }

    fn set_render_settings(&mut self, settings: RenderSettings) {
        self.settings = settings;
    }

    fn render(
        &mut self,
        _segmentation: &SegmentationResult,
        _background: &VirtualBackground,
        _frame: &RgbaImage,
        _surfaces: &mut SurfaceManager,
    ) {
    }
}
