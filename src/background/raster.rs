//! CPU matte pipeline and its scaling helpers.

use super::{MattePipeline, RenderSettings, VirtualBackground};
use crate::segmentation::SegmentationResult;
use crate::surface::{CompositeMode, FilterEffect, SurfaceManager, RASTER_SURFACE};
use image::RgbaImage;

/// Scales a child rectangle so it fully covers the parent while preserving
/// aspect ratio; the overflow on the longer axis gets cropped by the draw.
pub fn cover_fit(
    child_width: u32,
    child_height: u32,
    parent_width: u32,
    parent_height: u32,
) -> (u32, u32) {
    let parent_ratio = parent_width as f64 / parent_height as f64;
    let child_ratio = child_width as f64 / child_height as f64;

    if child_ratio < parent_ratio {
        let height = (parent_width as f64 / child_ratio).round() as u32;
        (parent_width, height)
    } else {
        let width = (parent_height as f64 * child_ratio).round() as u32;
        (width, parent_height)
    }
}

/// Offsets centering a (cover-fitted) child inside the parent. Both are <= 0
/// for a child at least as large as the parent.
pub fn center_offset(
    child_width: u32,
    child_height: u32,
    parent_width: u32,
    parent_height: u32,
) -> (i64, i64) {
    (
        -((child_width as i64 - parent_width as i64) / 2),
        -((child_height as i64 - parent_height as i64) / 2),
    )
}

/// The canonical compositing pipeline, drawing on the raster surface:
/// mask -> matte -> background, all through composite modes and draw filters.
pub struct RasterMattePipeline {
    settings: RenderSettings,
    /// Alpha-only mask image, reused across ticks and reallocated only when
    /// the mask's native dimensions change.
    mask_image: RgbaImage,
}

impl RasterMattePipeline {
    pub fn new() -> Self {
        Self {
            settings: RenderSettings::default(),
            mask_image: RgbaImage::new(1, 1),
        }
    }

    /// Writes the probability buffer into the alpha channel of the mask
    /// image; color channels stay unused.
    fn render_mask(&mut self, data: &[f32], width: u32, height: u32) {
        if self.mask_image.dimensions() != (width, height) {
            self.mask_image = RgbaImage::new(width.max(1), height.max(1));
        }

        for (pixel, p) in self.mask_image.pixels_mut().zip(data.iter()) {
            pixel.0[3] = (p.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

impl Default for RasterMattePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MattePipeline for RasterMattePipeline {
    fn render_settings(&self) -> RenderSettings {
        self.settings
    }

    fn set_render_settings(&mut self, settings: RenderSettings) {
        self.settings = settings;
    }

    fn render(
        &mut self,
        segmentation: &SegmentationResult,
        background: &VirtualBackground,
        frame: &RgbaImage,
        surfaces: &mut SurfaceManager,
    ) {
        if matches!(background, VirtualBackground::None) {
            return;
        }
        let Some(data) = &segmentation.data else { return };

        if surfaces.use_surface(RASTER_SURFACE, true).is_err() {
            return;
        }
        self.render_mask(data, segmentation.width, segmentation.height);

        let (surface_width, surface_height) = (surfaces.width(), surfaces.height());
        let Some(ctx) = surfaces.active_raster_mut() else { return };

        // Mask replaces the surface, blurred during the draw to soften the
        // segmentation contour. This is the only smoothing step.
        ctx.set_composite_mode(CompositeMode::Copy);
        if self.settings.contour_blur > 0.0 {
            ctx.set_filter(Some(FilterEffect::Blur(self.settings.contour_blur)));
        }
        ctx.draw_image(&self.mask_image);

        // Matte: frame color where the mask has alpha, transparency elsewhere.
        ctx.set_filter(None);
        ctx.set_composite_mode(CompositeMode::SourceIn);
        ctx.draw_image(frame);

        if matches!(background, VirtualBackground::Transparent) {
            return;
        }

        // Background goes in behind the matted subject.
        ctx.set_composite_mode(CompositeMode::DestinationOver);
        match background {
            VirtualBackground::Color(color) => {
                ctx.fill(*color);
            }
            VirtualBackground::Filter(effect) => {
                ctx.set_filter(Some(*effect));
                ctx.draw_image(frame);
                ctx.set_filter(None);
            }
            VirtualBackground::Image(image) => match image.image() {
                // Not decoded yet: the unfiltered frame stands in, avoiding a
                // blank flash.
                None => ctx.draw_image(frame),
                Some(decoded) => {
                    let (width, height) = cover_fit(
                        decoded.width(),
                        decoded.height(),
                        surface_width,
                        surface_height,
                    );
                    let (x, y) = center_offset(width, height, surface_width, surface_height);
                    ctx.draw_image_at(&decoded, x, y, width, height);
                }
            },
            VirtualBackground::None | VirtualBackground::Transparent => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundImage;
    use image::Rgba;

    fn segmentation(data: Vec<f32>, width: u32, height: u32) -> SegmentationResult {
        SegmentationResult {
            data: Some(data),
            width,
            height,
        }
    }

    /// Pipeline without contour blur, so mask edges stay exact.
    fn sharp_pipeline() -> RasterMattePipeline {
        let mut pipeline = RasterMattePipeline::new();
        pipeline.set_render_settings(RenderSettings { contour_blur: 0.0 });
        pipeline
    }

    fn surfaces(width: u32, height: u32) -> SurfaceManager {
        let mut surfaces = SurfaceManager::new();
        surfaces.set_dimensions(width, height);
        surfaces.begin_frame(None);
        surfaces
    }

    #[test]
    fn test_cover_fit_covers_parent_and_preserves_aspect() {
        let (width, height) = cover_fit(200, 100, 400, 400);

        assert!(width >= 400 && height >= 400);
        assert_eq!(width as f64 / height as f64, 200.0 / 100.0);

        let (x, y) = center_offset(width, height, 400, 400);
        assert!(x <= 0 && y <= 0);
        assert_eq!(width as i64 + 2 * x, 400);
        assert_eq!(height as i64 + 2 * y, 400);
    }

    #[test]
    fn test_cover_fit_tall_child() {
        let (width, height) = cover_fit(100, 400, 300, 300);
        assert_eq!((width, height), (300, 1200));
    }

    #[test]
    fn test_color_background_exact_split() {
        // Left half background (mask 0), right half subject (mask 1).
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(4, 2);
        let frame = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]));
        let seg = segmentation(vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0], 4, 2);

        pipeline.render(
            &seg,
            &VirtualBackground::Color(Rgba([0, 255, 0, 255])),
            &frame,
            &mut surfaces,
        );

        let pixels = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(pixels.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_eq!(pixels.get_pixel(1, 1).0, [0, 255, 0, 255]);
        assert_eq!(pixels.get_pixel(2, 0).0, [10, 20, 30, 255]);
        assert_eq!(pixels.get_pixel(3, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_mask_scales_to_surface_dimensions() {
        // A 2x2 mask drives an 8x8 surface: each cell maps to a 4x4 region.
        // Scaling interpolates at cell boundaries, so probe the region
        // corners farthest from them.
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(8, 8);
        let frame = RgbaImage::from_pixel(8, 8, Rgba([200, 0, 0, 255]));
        let seg = segmentation(vec![1.0, 0.0, 0.0, 0.0], 2, 2);

        pipeline.render(
            &seg,
            &VirtualBackground::Color(Rgba([0, 0, 255, 255])),
            &frame,
            &mut surfaces,
        );

        let pixels = surfaces.active_raster_mut().unwrap().pixels().clone();
        // Top-left: subject shows, background does not.
        let subject = pixels.get_pixel(0, 0).0;
        assert!(subject[0] > 180 && subject[2] < 40, "subject pixel {:?}", subject);
        // Bottom-right: background shows, subject does not.
        let backdrop = pixels.get_pixel(7, 7).0;
        assert!(backdrop[2] > 220 && backdrop[0] < 30, "backdrop pixel {:?}", backdrop);
    }

    #[test]
    fn test_transparent_background_keeps_alpha() {
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(2, 1);
        let frame = RgbaImage::from_pixel(2, 1, Rgba([9, 9, 9, 255]));
        let seg = segmentation(vec![1.0, 0.0], 2, 1);

        pipeline.render(&seg, &VirtualBackground::Transparent, &frame, &mut surfaces);

        let pixels = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(pixels.get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(pixels.get_pixel(1, 0).0[3], 0);
    }

    #[test]
    fn test_none_background_draws_nothing() {
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(2, 1);
        let before = surfaces.active_raster_mut().unwrap().pixels().clone();
        let frame = RgbaImage::from_pixel(2, 1, Rgba([50, 50, 50, 255]));
        let seg = segmentation(vec![1.0, 1.0], 2, 1);

        pipeline.render(&seg, &VirtualBackground::None, &frame, &mut surfaces);

        let after = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(before.as_raw(), after.as_raw());
    }

    #[test]
    fn test_undecoded_image_falls_back_to_frame() {
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(2, 1);
        let frame = RgbaImage::from_pixel(2, 1, Rgba([70, 80, 90, 255]));
        let seg = segmentation(vec![0.0, 0.0], 2, 1);

        let undecoded = BackgroundImage::load("/nonexistent/backdrop.png");
        pipeline.render(
            &seg,
            &VirtualBackground::Image(undecoded),
            &frame,
            &mut surfaces,
        );

        // Mask is all-background, yet the live frame shows through as the
        // stand-in.
        let pixels = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(pixels.get_pixel(0, 0).0, [70, 80, 90, 255]);
    }

    #[test]
    fn test_decoded_image_cover_fits() {
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(2, 2);
        let frame = RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255]));
        let seg = segmentation(vec![0.0; 4], 2, 2);

        let backdrop = BackgroundImage::from_image(RgbaImage::from_pixel(8, 8, Rgba([0, 9, 0, 255])));
        pipeline.render(
            &seg,
            &VirtualBackground::Image(backdrop),
            &frame,
            &mut surfaces,
        );

        let pixels = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(pixels.get_pixel(0, 0).0, [0, 9, 0, 255]);
        assert_eq!(pixels.get_pixel(1, 1).0, [0, 9, 0, 255]);
    }

    #[test]
    fn test_missing_mask_data_is_noop() {
        let mut pipeline = sharp_pipeline();
        let mut surfaces = surfaces(2, 1);
        let before = surfaces.active_raster_mut().unwrap().pixels().clone();
        let frame = RgbaImage::from_pixel(2, 1, Rgba([3, 3, 3, 255]));
        let seg = SegmentationResult {
            data: None,
            width: 2,
            height: 1,
        };

        pipeline.render(
            &seg,
            &VirtualBackground::Color(Rgba([255, 0, 0, 255])),
            &frame,
            &mut surfaces,
        );

        let after = surfaces.active_raster_mut().unwrap().pixels().clone();
        assert_eq!(before.as_raw(), after.as_raw());
    }
}
