//! Immediate-mode 2D raster surface.

use image::{imageops, Rgba, RgbaImage};

/// How a drawn source combines with existing surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Source blended over the destination (default painting).
    SourceOver,
    /// Source replaces the destination, alpha included.
    Copy,
    /// Source color everywhere, result alpha = source alpha * destination
    /// alpha. Used for matting a frame against a mask already on the surface.
    SourceIn,
    /// Source drawn behind the existing content; only shows through where the
    /// destination is not already opaque.
    DestinationOver,
}

/// A cosmetic effect applied to the source image during a draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterEffect {
    /// Gaussian blur with the given sigma, in pixels.
    Blur(f32),
}

/// A pixel buffer plus immediate-mode draw state.
///
/// All draw operations scale their source, apply the current filter to it,
/// then combine it with the surface pixels under the current composite mode.
pub struct RasterSurface {
    pixels: RgbaImage,
    composite: CompositeMode,
    filter: Option<FilterEffect>,
}

impl RasterSurface {
    pub fn new() -> Self {
        Self {
            pixels: RgbaImage::new(1, 1),
            composite: CompositeMode::SourceOver,
            filter: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn set_composite_mode(&mut self, mode: CompositeMode) {
        self.composite = mode;
    }

    pub fn set_filter(&mut self, filter: Option<FilterEffect>) {
        self.filter = filter;
    }

    /// Resets draw state without touching pixels: composite back to `Copy`,
    /// filter cleared.
    pub fn reset_draw_state(&mut self) {
        self.composite = CompositeMode::Copy;
        self.filter = None;
    }

    /// Resizing clears the pixel buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pixels = RgbaImage::new(width.max(1), height.max(1));
    }

    /// Draws `source` scaled to cover the whole surface.
    pub fn draw_image(&mut self, source: &RgbaImage) {
        let (w, h) = (self.width(), self.height());
        let prepared = self.prepare_source(source, w, h);
        self.composite_at(&prepared, 0, 0);
    }

    /// Draws `source` scaled to `width`x`height` at a signed offset; parts
    /// falling outside the surface are clipped.
    pub fn draw_image_at(&mut self, source: &RgbaImage, x: i64, y: i64, width: u32, height: u32) {
        let prepared = self.prepare_source(source, width, height);
        self.composite_at(&prepared, x, y);
    }

    /// Fills the whole surface with a flat color under the current composite
    /// mode.
    pub fn fill(&mut self, color: Rgba<u8>) {
        let composite = self.composite;
        for dst in self.pixels.pixels_mut() {
            *dst = blend(composite, color, *dst);
        }
    }

    fn prepare_source(&self, source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        let scaled = scale_rgba(source, width, height);
        match self.filter {
            Some(FilterEffect::Blur(sigma)) if sigma > 0.0 => imageops::blur(&scaled, sigma),
            _ => scaled,
        }
    }

    fn composite_at(&mut self, source: &RgbaImage, x: i64, y: i64) {
        let (dst_w, dst_h) = (self.width() as i64, self.height() as i64);
        let composite = self.composite;
        for (sx, sy, src) in source.enumerate_pixels() {
            let dx = x + sx as i64;
            let dy = y + sy as i64;
            if dx < 0 || dy < 0 || dx >= dst_w || dy >= dst_h {
                continue;
            }
            let dst = self.pixels.get_pixel_mut(dx as u32, dy as u32);
            *dst = blend(composite, *src, *dst);
        }
    }
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Scales an RGBA image with fast_image_resize. Returns a clone when the
/// dimensions already match.
pub(crate) fn scale_rgba(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if source.dimensions() == (width, height) {
        return source.clone();
    }

    let src = fast_image_resize::images::Image::from_vec_u8(
        source.width(),
        source.height(),
        source.as_raw().clone(),
        fast_image_resize::PixelType::U8x4,
    )
    .expect("RGBA buffer length matches dimensions");
    let mut dst =
        fast_image_resize::images::Image::new(width, height, fast_image_resize::PixelType::U8x4);

    let mut resizer = fast_image_resize::Resizer::new();
    resizer
        .resize(&src, &mut dst, None)
        .expect("source and destination pixel types match");

    RgbaImage::from_raw(width, height, dst.into_vec())
        .expect("resized buffer length matches dimensions")
}

fn blend(mode: CompositeMode, src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    match mode {
        CompositeMode::Copy => src,
        CompositeMode::SourceIn => {
            let alpha = (src.0[3] as u16 * dst.0[3] as u16 + 127) / 255;
            Rgba([src.0[0], src.0[1], src.0[2], alpha as u8])
        }
        CompositeMode::SourceOver => over(src, dst),
        CompositeMode::DestinationOver => over(dst, src),
    }
}

/// Straight-alpha `top over bottom`. Exact at the extremes: a fully opaque
/// top replaces the pixel, a fully transparent top leaves it untouched.
fn over(top: Rgba<u8>, bottom: Rgba<u8>) -> Rgba<u8> {
    let ta = top.0[3] as f32 / 255.0;
    let ba = bottom.0[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let tc = top.0[c] as f32;
        let bc = bottom.0[c] as f32;
        out[c] = ((tc * ta + bc * ba * (1.0 - ta)) / out_a).round() as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn test_copy_replaces_pixels_including_alpha() {
        let mut surface = RasterSurface::new();
        surface.resize(2, 2);
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(2, 2, [10, 20, 30, 40]));

        assert_eq!(surface.pixels().get_pixel(1, 1).0, [10, 20, 30, 40]);
    }

    #[test]
    fn test_source_in_keeps_source_color_and_multiplies_alpha() {
        let mut surface = RasterSurface::new();
        surface.resize(1, 1);
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(1, 1, [0, 0, 0, 255]));
        surface.set_composite_mode(CompositeMode::SourceIn);
        surface.draw_image(&solid(1, 1, [200, 100, 50, 255]));

        assert_eq!(surface.pixels().get_pixel(0, 0).0, [200, 100, 50, 255]);

        // Against a transparent destination the source disappears.
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(1, 1, [0, 0, 0, 0]));
        surface.set_composite_mode(CompositeMode::SourceIn);
        surface.draw_image(&solid(1, 1, [200, 100, 50, 255]));

        assert_eq!(surface.pixels().get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_destination_over_only_shows_through_transparency() {
        let mut surface = RasterSurface::new();
        surface.resize(1, 1);
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(1, 1, [9, 9, 9, 255]));
        surface.set_composite_mode(CompositeMode::DestinationOver);
        surface.fill(Rgba([0, 255, 0, 255]));

        // Opaque destination wins.
        assert_eq!(surface.pixels().get_pixel(0, 0).0, [9, 9, 9, 255]);

        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(1, 1, [0, 0, 0, 0]));
        surface.set_composite_mode(CompositeMode::DestinationOver);
        surface.fill(Rgba([0, 255, 0, 255]));

        // Transparent destination shows the fill exactly.
        assert_eq!(surface.pixels().get_pixel(0, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_draw_image_at_clips_negative_offsets() {
        let mut surface = RasterSurface::new();
        surface.resize(2, 2);
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image_at(&solid(1, 1, [255, 0, 0, 255]), -1, -1, 4, 4);

        // The visible quadrant of the oversized draw covers the surface.
        assert_eq!(surface.pixels().get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(surface.pixels().get_pixel(1, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_reset_draw_state_leaves_pixels() {
        let mut surface = RasterSurface::new();
        surface.resize(1, 1);
        surface.set_composite_mode(CompositeMode::Copy);
        surface.draw_image(&solid(1, 1, [1, 2, 3, 255]));
        surface.set_filter(Some(FilterEffect::Blur(2.0)));

        surface.reset_draw_state();

        assert_eq!(surface.pixels().get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(surface.composite, CompositeMode::Copy);
        assert!(surface.filter.is_none());
    }

    #[test]
    fn test_scale_rgba_changes_dimensions() {
        let scaled = scale_rgba(&solid(2, 2, [7, 7, 7, 255]), 4, 4);
        assert_eq!(scaled.dimensions(), (4, 4));
        assert_eq!(scaled.get_pixel(3, 3).0, [7, 7, 7, 255]);
    }
}
