//! Webcam frame source (nokhwa).

use super::FrameSource;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::Result;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Webcam source capturing on a worker thread. The pipeline samples the
/// latest decoded frame; slow ticks simply skip camera frames instead of
/// queueing them.
pub struct CameraSource {
    latest: Arc<Mutex<Option<Arc<VideoFrame>>>>,
    stop: Arc<AtomicBool>,
    width: u32,
    height: u32,
}

impl CameraSource {
    /// Returns a list of available camera devices.
    pub fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    /// Opens the camera and starts the capture thread.
    pub fn open(config: CameraConfig) -> Result<Self> {
        // Some cameras reject a "Closest" hint that doesn't roughly match a
        // format they support, so try a handful of seeds: the requested
        // geometry first, then common fallbacks, uncompressed before MJPEG.
        let mut seed_formats = vec![
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::NV12,
                config.fps,
            ),
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::YUYV,
                config.fps,
            ),
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::MJPEG,
                config.fps,
            ),
        ];
        for format in [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG] {
            seed_formats.push(CameraFormat::new(Resolution::new(1280, 720), format, 30));
            seed_formats.push(CameraFormat::new(Resolution::new(640, 480), format, 30));
        }

        let mut camera = None;
        for seed in seed_formats {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            let idx = CameraIndex::Index(config.device_index);

            if let Ok(mut cam) = Camera::new(idx, requested) {
                // Creating the object isn't enough for some drivers; the
                // stream has to actually open.
                if cam.open_stream().is_ok() {
                    info!("Camera connected with seed format: {:?}", seed);
                    camera = Some(cam);
                    break;
                }
            }
        }

        let mut camera = camera.ok_or_else(|| {
            anyhow::anyhow!(
                "Could not connect to and open stream on camera index {} with any standard format.",
                config.device_index
            )
        })?;

        let resolution = camera.resolution();
        info!("Camera opened with resolution: {}", resolution);
        let (width, height) = (resolution.width(), resolution.height());

        let latest = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_latest = latest.clone();
        let thread_stop = stop.clone();
        thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                match camera.frame() {
                    Ok(frame) => match frame.decode_image::<RgbFormat>() {
                        Ok(decoded) => {
                            let frame = VideoFrame::from_data(
                                width,
                                height,
                                PixelFormat::Rgb,
                                decoded.into_raw(),
                            );
                            *thread_latest.lock().unwrap() = Some(Arc::new(frame));
                        }
                        Err(e) => warn!("Failed to decode camera frame: {}", e),
                    },
                    Err(e) => {
                        warn!("Camera frame error: {}", e);
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            let _ = camera.stop_stream();
        });

        Ok(Self {
            latest,
            stop,
            width,
            height,
        })
    }
}

impl FrameSource for CameraSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.latest.lock().unwrap().clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
