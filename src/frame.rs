//! Video frame types and pixel format conversion.

use image::RgbaImage;

/// Pixel layouts accepted from frame sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
    /// YUV 4:2:2 packed format (Y0 U0 Y1 V0)
    Yuyv,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Yuyv => 2,
        }
    }
}

/// A decoded video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Timestamp in microseconds (if the source provides one)
    pub timestamp_us: Option<u64>,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a zeroed frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data: vec![0; size],
        }
    }

    /// Creates a frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// Converts this frame into the canonical RGBA image used by analyzers
    /// and surfaces.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let rgba = self.to_rgba();
        RgbaImage::from_raw(rgba.width, rgba.height, rgba.data)
            .expect("RGBA buffer length matches dimensions")
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> VideoFrame {
        if self.format == PixelFormat::Rgba {
            return self.clone();
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let pixel_count = width * height;
        let mut rgba_data = vec![0u8; pixel_count * 4];

        match self.format {
            // Fast path for RGB -> RGBA: just add alpha=255, no color conversion needed
            PixelFormat::Rgb => {
                for i in 0..pixel_count {
                    rgba_data[i * 4] = self.data[i * 3];
                    rgba_data[i * 4 + 1] = self.data[i * 3 + 1];
                    rgba_data[i * 4 + 2] = self.data[i * 3 + 2];
                    rgba_data[i * 4 + 3] = 255;
                }
            }
            // Use ezk_image for the YUV conversion
            PixelFormat::Yuyv => {
                let dst_color = ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
                    transfer: ezk_image::ColorTransfer::Linear,
                    primaries: ezk_image::ColorPrimaries::BT709,
                });
                let mut dst_image = ezk_image::Image::from_buffer(
                    ezk_image::PixelFormat::RGBA,
                    &mut rgba_data[..],
                    None,
                    width,
                    height,
                    dst_color,
                )
                .expect("Failed to wrap RGBA dst buffer");

                let src_color = ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
                    transfer: ezk_image::ColorTransfer::Linear,
                    primaries: ezk_image::ColorPrimaries::BT709,
                    space: ezk_image::ColorSpace::BT709,
                    full_range: false,
                });
                let src_image = ezk_image::Image::from_buffer(
                    ezk_image::PixelFormat::YUYV,
                    &self.data[..],
                    None,
                    width,
                    height,
                    src_color,
                )
                .expect("Failed to wrap YUYV buffer");
                ezk_image::convert(&src_image, &mut dst_image).expect("Conversion failed");
            }
            PixelFormat::Rgba => unreachable!(),
        }

        VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data: rgba_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        // Check first pixel (red)
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        // Check second pixel (green)
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_yuyv_to_rgba_dimensions() {
        let frame = VideoFrame::new(4, 2, PixelFormat::Yuyv);
        let rgba_frame = frame.to_rgba();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 4 * 2 * 4);
        // Alpha is fully opaque after conversion
        assert!(rgba_frame.data.chunks(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_to_rgba_image_round_trip() {
        let frame = VideoFrame::from_data(1, 1, PixelFormat::Rgb, vec![10, 20, 30]);
        let img = frame.to_rgba_image();
        assert_eq!(img.dimensions(), (1, 1));
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }
}
