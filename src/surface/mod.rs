//! Drawing surfaces and the manager coordinating them.

mod gpu;
mod raster;

pub use gpu::GpuSurface;
pub use raster::{CompositeMode, FilterEffect, RasterSurface};

use crate::registry::{ConfigurationError, Registry};
use image::RgbaImage;

/// Id of the immediate-mode 2D surface renderers draw on.
pub const RASTER_SURFACE: &str = "raster";
/// Id of the GPU surface (extension point).
pub const GPU_SURFACE: &str = "gpu";
/// Id of the surface whose pixels feed the output stream.
pub const OUTPUT_SURFACE: &str = "output";

/// A single drawable target: a pixel buffer plus its drawing state.
///
/// Surfaces are owned exclusively by a [`SurfaceManager`]; dimensions are set
/// through the manager, never from outside.
pub trait Surface {
    fn set_dimensions(&mut self, width: u32, height: u32);

    /// Clears compositing mode and filters. Pixels are untouched.
    fn reset_state(&mut self);

    /// Current pixel contents, when the surface supports readback.
    fn snapshot(&self) -> Option<RgbaImage>;

    /// Replaces pixel contents with another surface's snapshot, scaling when
    /// dimensions differ.
    fn load_pixels(&mut self, pixels: &RgbaImage);

    /// Immediate-mode 2D access, when the surface has it.
    fn as_raster_mut(&mut self) -> Option<&mut RasterSurface> {
        None
    }
}

impl Surface for RasterSurface {
    fn set_dimensions(&mut self, width: u32, height: u32) {
        self.resize(width, height);
    }

    fn reset_state(&mut self) {
        self.reset_draw_state();
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        Some(self.pixels().clone())
    }

    fn load_pixels(&mut self, pixels: &RgbaImage) {
        self.set_composite_mode(CompositeMode::Copy);
        self.draw_image(pixels);
    }

    fn as_raster_mut(&mut self) -> Option<&mut RasterSurface> {
        Some(self)
    }
}

/// Owns the named set of surfaces, one of which is active at a time.
///
/// Switching surfaces always resets the target's draw state first; pixel
/// hand-off between surfaces is opt-in per switch. State and pixels are
/// managed independently: switching to the already-active surface is a state
/// reset and nothing else.
pub struct SurfaceManager {
    surfaces: Registry<Box<dyn Surface>>,
    width: u32,
    height: u32,
}

impl SurfaceManager {
    pub fn new() -> Self {
        let mut surfaces = Registry::new(
            "surface",
            RASTER_SURFACE,
            Box::new(RasterSurface::new()) as Box<dyn Surface>,
        );
        surfaces.register(GPU_SURFACE, Box::new(GpuSurface::new()));
        surfaces.register(OUTPUT_SURFACE, Box::new(RasterSurface::new()));

        Self {
            surfaces,
            width: 1,
            height: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Propagates new dimensions to every owned surface.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        for (_, surface) in self.surfaces.iter_mut() {
            surface.set_dimensions(self.width, self.height);
        }
    }

    pub fn active_id(&self) -> &str {
        self.surfaces.active_id()
    }

    /// Registers an additional surface under `id`, sized to match.
    pub fn register(&mut self, id: impl Into<String>, mut surface: Box<dyn Surface>) {
        surface.set_dimensions(self.width, self.height);
        self.surfaces.register(id, surface);
    }

    /// Makes `id` the active surface.
    ///
    /// The target's draw state is reset first. When `id` is already active
    /// nothing else happens; otherwise, with `copy`, the outgoing surface's
    /// pixels are copied into the target before the switch.
    pub fn use_surface(&mut self, id: &str, copy: bool) -> Result<(), ConfigurationError> {
        if !self.surfaces.contains(id) {
            return Err(self.surfaces.missing(id));
        }
        if let Some(target) = self.surfaces.get_mut(id) {
            target.reset_state();
        }

        if self.surfaces.active_id() == id {
            return Ok(());
        }

        if copy {
            if let Some(pixels) = self.surfaces.current().1.snapshot() {
                if let Some(target) = self.surfaces.get_mut(id) {
                    target.load_pixels(&pixels);
                }
            }
        }

        self.surfaces.select(id)
    }

    /// Starts a tick's drawing: switches to the raster surface without pixel
    /// hand-off and paints the raw frame, when one is available.
    pub fn begin_frame(&mut self, frame: Option<&RgbaImage>) {
        self.use_surface(RASTER_SURFACE, false)
            .expect("raster surface is always registered");
        if let Some(frame) = frame {
            if let Some(ctx) = self.active_raster_mut() {
                ctx.draw_image(frame);
            }
        }
    }

    /// Ends a tick's drawing: switches to the output surface with pixel
    /// hand-off, making the composed frame externally visible.
    pub fn finish_frame(&mut self) {
        self.use_surface(OUTPUT_SURFACE, true)
            .expect("output surface is always registered");
    }

    /// The active surface's 2D context, when it has one.
    pub fn active_raster_mut(&mut self) -> Option<&mut RasterSurface> {
        self.surfaces.current_mut().1.as_raster_mut()
    }

    /// Pixels of the output surface.
    pub fn output_snapshot(&self) -> Option<RgbaImage> {
        self.surfaces.get(OUTPUT_SURFACE)?.snapshot()
    }
}

impl Default for SurfaceManager {
    fn default() -> Self {
        Self::new()
    }
}
