//! Live frame sources.

mod camera;

pub use camera::{CameraConfig, CameraInfo, CameraSource};

use crate::frame::{PixelFormat, VideoFrame};
use std::sync::{Arc, Mutex};

/// A live video source the pipeline samples each tick.
///
/// The pipeline holds a shared reference and never owns the source; the
/// embedding keeps its own handle for lifecycle control.
pub trait FrameSource: Send + Sync {
    /// The most recent decoded frame, or `None` before the first one lands.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Whether at least one decoded frame is available.
    fn is_ready(&self) -> bool {
        self.current_frame().is_some()
    }

    /// Intrinsic source dimensions.
    fn dimensions(&self) -> (u32, u32);
}

/// Deterministic source for tests and camera-less runs: a fixed gradient
/// frame, replaceable via [`set_frame`](Self::set_frame).
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame: Mutex<Option<Arc<VideoFrame>>>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        let mut frame = VideoFrame::new(width, height, PixelFormat::Rgb);
        for y in 0..height {
            for x in 0..width {
                let i = ((y * width + x) * 3) as usize;
                frame.data[i] = (x * 255 / width.max(1)) as u8;
                frame.data[i + 1] = (y * 255 / height.max(1)) as u8;
                frame.data[i + 2] = 128;
            }
        }
        Self {
            width,
            height,
            frame: Mutex::new(Some(Arc::new(frame))),
        }
    }

    /// A source that reports dimensions but has no decoded frame yet.
    pub fn not_ready(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: Mutex::new(None),
        }
    }

    /// Replaces the current frame.
    pub fn set_frame(&self, frame: VideoFrame) {
        *self.frame.lock().unwrap() = Some(Arc::new(frame));
    }
}

impl FrameSource for TestPatternSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frame.lock().unwrap().clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_source_is_ready_with_gradient() {
        let source = TestPatternSource::new(4, 4);
        assert!(source.is_ready());

        let frame = source.current_frame().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
        assert_eq!(frame.format, PixelFormat::Rgb);
    }

    #[test]
    fn test_not_ready_source_has_dimensions_only() {
        let source = TestPatternSource::not_ready(8, 6);
        assert!(!source.is_ready());
        assert!(source.current_frame().is_none());
        assert_eq!(source.dimensions(), (8, 6));
    }
}
