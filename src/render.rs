//! Frame renderers and the ordered chain that composites them.

use crate::analyze::AnalyzerResults;
use crate::surface::SurfaceManager;
use image::RgbaImage;
use std::any::Any;

/// A runnable rendering stage, drawing onto the surface manager's active
/// surface.
///
/// Render must not propagate failures: a stage that cannot draw this tick
/// logs and returns, leaving the surface as the earlier stages left it.
pub trait FrameRenderer: Any {
    fn render(
        &mut self,
        results: &AnalyzerResults,
        frame: Option<&RgbaImage>,
        surfaces: &mut SurfaceManager,
    );

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct RendererEntry {
    enabled: bool,
    stage: Box<dyn FrameRenderer>,
}

/// Ordered, index-addressed collection of renderers, run once per tick over
/// the shared analyzer results.
pub struct RenderChain {
    entries: Vec<RendererEntry>,
}

impl RenderChain {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a stage, enabled, and returns its index.
    pub fn add(&mut self, stage: Box<dyn FrameRenderer>) -> usize {
        self.entries.push(RendererEntry { enabled: true, stage });
        self.entries.len() - 1
    }

    /// Removes and returns the stage at `index`; later stages shift down.
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn FrameRenderer>> {
        if index >= self.entries.len() {
            return None;
        }
        Some(self.entries.remove(index).stage)
    }

    /// Flips a stage's enabled flag; a disabled stage is skipped without
    /// being invoked. Returns false for out-of-range indices.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Typed access to a stage, for reconfiguring it in place.
    pub fn get_mut<T: FrameRenderer>(&mut self, index: usize) -> Option<&mut T> {
        self.entries
            .get_mut(index)?
            .stage
            .as_any_mut()
            .downcast_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs enabled stages in registration order.
    pub fn run(
        &mut self,
        results: &AnalyzerResults,
        frame: Option<&RgbaImage>,
        surfaces: &mut SurfaceManager,
    ) {
        for entry in self.entries.iter_mut() {
            if !entry.enabled {
                continue;
            }
            entry.stage.render(results, frame, surfaces);
        }
    }
}

impl Default for RenderChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{CompositeMode, RASTER_SURFACE};
    use image::Rgba;

    /// Paints the whole active raster surface with a flat color.
    struct FillRenderer {
        color: Rgba<u8>,
    }

    impl FrameRenderer for FillRenderer {
        fn render(
            &mut self,
            _results: &AnalyzerResults,
            _frame: Option<&RgbaImage>,
            surfaces: &mut SurfaceManager,
        ) {
            if surfaces.use_surface(RASTER_SURFACE, true).is_err() {
                return;
            }
            if let Some(ctx) = surfaces.active_raster_mut() {
                ctx.set_composite_mode(CompositeMode::Copy);
                ctx.fill(self.color);
            }
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_chain_runs_in_registration_order() {
        let mut chain = RenderChain::new();
        let mut surfaces = SurfaceManager::new();
        surfaces.set_dimensions(2, 2);
        let analyzers = crate::analyze::AnalyzerSet::new();
        let results = analyzers.results();

        chain.add(Box::new(FillRenderer { color: Rgba([255, 0, 0, 255]) }));
        let green = chain.add(Box::new(FillRenderer { color: Rgba([0, 255, 0, 255]) }));

        surfaces.begin_frame(None);
        chain.run(results, None, &mut surfaces);
        surfaces.finish_frame();

        // The later stage painted last.
        let output = surfaces.output_snapshot().unwrap();
        assert_eq!(output.get_pixel(0, 0).0, [0, 255, 0, 255]);

        // Disabling it leaves the earlier stage's effect on the output.
        chain.set_enabled(green, false);
        surfaces.begin_frame(None);
        chain.run(results, None, &mut surfaces);
        surfaces.finish_frame();

        let output = surfaces.output_snapshot().unwrap();
        assert_eq!(output.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_remove_shifts_indices() {
        let mut chain = RenderChain::new();
        chain.add(Box::new(FillRenderer { color: Rgba([1, 1, 1, 255]) }));
        chain.add(Box::new(FillRenderer { color: Rgba([2, 2, 2, 255]) }));

        assert!(chain.remove(0).is_some());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.get_mut::<FillRenderer>(0).unwrap().color.0, [2, 2, 2, 255]);
        assert!(chain.remove(5).is_none());
    }
}
