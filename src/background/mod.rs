//! Virtual background replacement: the renderer stage, the pipeline
//! contract, and the background descriptor.

mod gpu;
mod raster;

pub use gpu::GpuMattePipeline;
pub use raster::{center_offset, cover_fit, RasterMattePipeline};

use crate::analyze::AnalyzerResults;
use crate::registry::{ConfigurationError, Registry};
use crate::render::FrameRenderer;
use crate::segmentation::{SegmentationResult, SEGMENTATION_RESULT};
use crate::surface::{FilterEffect, SurfaceManager};
use anyhow::Result;
use image::{Rgba, RgbaImage};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{info, warn};

/// Id of the CPU matte pipeline.
pub const RASTER_PIPELINE: &str = "raster";
/// Id of the GPU matte pipeline (extension point).
pub const GPU_PIPELINE: &str = "gpu";

/// What gets drawn behind the matted subject.
pub enum VirtualBackground {
    /// Background replacement disabled; the frame passes through untouched.
    None,
    /// Foreground only; the output carries an alpha channel.
    Transparent,
    /// Flat fill.
    Color(Rgba<u8>),
    /// The live frame re-drawn with a cosmetic effect ("blurred self").
    Filter(FilterEffect),
    /// A substitute image, cover-fitted to the surface.
    Image(BackgroundImage),
}

struct ImageSlot {
    pending: Option<Receiver<Result<RgbaImage>>>,
    image: Option<Arc<RgbaImage>>,
}

/// Handle to a background image decoded on a worker thread. Until the decode
/// finishes, `image()` reports nothing and pipelines draw a stand-in.
#[derive(Clone)]
pub struct BackgroundImage {
    path: PathBuf,
    slot: Arc<Mutex<ImageSlot>>,
}

impl BackgroundImage {
    /// Starts decoding `path` in the background.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        info!("Loading background image from {:?}", path);

        let (tx, rx) = mpsc::channel();
        let decode_path = path.clone();
        thread::spawn(move || {
            let result = image::open(&decode_path)
                .map(|img| img.to_rgba8())
                .map_err(anyhow::Error::from);
            let _ = tx.send(result);
        });

        Self {
            path,
            slot: Arc::new(Mutex::new(ImageSlot {
                pending: Some(rx),
                image: None,
            })),
        }
    }

    /// Wraps an already-decoded image (tests, programmatic backgrounds).
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            path: PathBuf::new(),
            slot: Arc::new(Mutex::new(ImageSlot {
                pending: None,
                image: Some(Arc::new(image)),
            })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded image, once available. Polls the decode thread.
    pub fn image(&self) -> Option<Arc<RgbaImage>> {
        let mut slot = self.slot.lock().expect("image slot lock poisoned");
        let state = &mut *slot;
        if let Some(rx) = state.pending.take() {
            match rx.try_recv() {
                Ok(Ok(image)) => {
                    state.image = Some(Arc::new(image));
                }
                Ok(Err(e)) => {
                    warn!("Failed to decode background image {:?}: {:#}", self.path, e);
                }
                Err(mpsc::TryRecvError::Empty) => {
                    state.pending = Some(rx);
                }
                Err(mpsc::TryRecvError::Disconnected) => {}
            }
        }
        state.image.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.image().is_some()
    }
}

/// Typed settings for matte pipelines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Gaussian sigma, in pixels, applied while drawing the mask to soften
    /// segmentation contours. Zero disables smoothing.
    pub contour_blur: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { contour_blur: 4.0 }
    }
}

/// A compositing strategy turning a probability mask into a matted frame on
/// the surface manager.
pub trait MattePipeline {
    fn render_settings(&self) -> RenderSettings;

    fn set_render_settings(&mut self, settings: RenderSettings);

    fn render(
        &mut self,
        segmentation: &SegmentationResult,
        background: &VirtualBackground,
        frame: &RgbaImage,
        surfaces: &mut SurfaceManager,
    );
}

/// Renderer stage matting the live subject over the configured background.
///
/// Holds the one live [`VirtualBackground`] instance and a registry of matte
/// pipelines. When the segmentation analyzer has produced no mask data, the
/// stage is a no-op and the previous output persists.
pub struct VirtualBackgroundRenderer {
    background: VirtualBackground,
    pipelines: Registry<Box<dyn MattePipeline>>,
}

impl VirtualBackgroundRenderer {
    /// Builds the renderer with the shipped pipelines, raster active, and no
    /// background configured.
    pub fn new() -> Self {
        let mut pipelines = Registry::new(
            "matte pipeline",
            RASTER_PIPELINE,
            Box::new(RasterMattePipeline::new()) as Box<dyn MattePipeline>,
        );
        pipelines.register(GPU_PIPELINE, Box::new(GpuMattePipeline::new()));

        Self {
            background: VirtualBackground::None,
            pipelines,
        }
    }

    /// Replaces the background descriptor in place.
    pub fn set_background(&mut self, background: VirtualBackground) {
        self.background = background;
    }

    pub fn background(&self) -> &VirtualBackground {
        &self.background
    }

    /// Switches the active matte pipeline.
    pub fn set_pipeline(&mut self, id: &str) -> Result<(), ConfigurationError> {
        self.pipelines.select(id)
    }

    pub fn pipeline_id(&self) -> &str {
        self.pipelines.active_id()
    }

    pub fn render_settings(&self) -> RenderSettings {
        self.pipelines.current().1.render_settings()
    }

    pub fn set_render_settings(&mut self, settings: RenderSettings) {
        self.pipelines.current_mut().1.set_render_settings(settings);
    }
}

impl Default for VirtualBackgroundRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRenderer for VirtualBackgroundRenderer {
    fn render(
        &mut self,
        results: &AnalyzerResults,
        frame: Option<&RgbaImage>,
        surfaces: &mut SurfaceManager,
    ) {
        let Some(frame) = frame else { return };
        let Some(segmentation) = results.get::<SegmentationResult>(SEGMENTATION_RESULT) else {
            return;
        };
        if segmentation.data.is_none() {
            return;
        }

        self.pipelines
            .current_mut()
            .1
            .render(segmentation, &self.background, frame, surfaces);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_pipeline_unknown_id_fails_fast() {
        let mut renderer = VirtualBackgroundRenderer::new();
        assert!(renderer.set_pipeline("quantum").is_err());
        assert_eq!(renderer.pipeline_id(), RASTER_PIPELINE);

        renderer.set_pipeline(GPU_PIPELINE).unwrap();
        assert_eq!(renderer.pipeline_id(), GPU_PIPELINE);
    }

    #[test]
    fn test_background_image_from_image_is_ready() {
        let handle = BackgroundImage::from_image(RgbaImage::new(2, 2));
        assert!(handle.is_ready());
        assert_eq!(handle.image().unwrap().dimensions(), (2, 2));
    }

    #[test]
    fn test_background_image_missing_file_never_ready() {
        let handle = BackgroundImage::load("/nonexistent/backdrop.png");
        // Wait for the decode thread to fail.
        for _ in 0..100 {
            if !handle.is_ready() && handle.slot.lock().unwrap().pending.is_none() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(!handle.is_ready());
    }
}
