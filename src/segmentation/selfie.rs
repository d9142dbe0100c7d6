//! Selfie-segmentation backend (MediaPipe-style person/background model).

use super::{apply_threshold, build_session, ModelConfig, SegmentationBackend, SegmentationConfig};
use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbaImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{info, warn};

/// Selfie segmenter input size.
const MODEL_WIDTH: u32 = 256;
const MODEL_HEIGHT: u32 = 256;

/// Person-segmentation backend for selfie-style models: NHWC input
/// normalized to [0, 1], single-channel confidence output at 256x256. Lighter
/// than MODNet, with coarser mask edges.
pub struct SelfieBackend {
    session: Option<Session>,
    pending: Option<Receiver<Result<Session>>>,
    pending_config: Option<ModelConfig>,
    model_config: ModelConfig,
    seg_config: SegmentationConfig,
}

impl SelfieBackend {
    pub fn new() -> Self {
        Self {
            session: None,
            pending: None,
            pending_config: None,
            model_config: ModelConfig {
                model_path: PathBuf::from("models/selfie_segmenter.onnx"),
                intra_threads: 2,
            },
            seg_config: SegmentationConfig::default(),
        }
    }

    fn poll_pending(&mut self) {
        let Some(rx) = self.pending.take() else { return };
        match rx.try_recv() {
            Ok(Ok(session)) => {
                info!("Selfie segmentation model loaded");
                self.session = Some(session);
                if let Some(config) = self.pending_config.take() {
                    self.model_config = config;
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to load selfie segmentation model: {:#}", e);
                self.pending_config = None;
            }
            Err(mpsc::TryRecvError::Empty) => {
                self.pending = Some(rx);
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!("Selfie segmentation loader thread died");
                self.pending_config = None;
            }
        }
    }

    fn infer(&mut self, frame: &RgbaImage) -> Result<Vec<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("model not loaded"))?;

        let resized = image::imageops::resize(
            frame,
            MODEL_WIDTH,
            MODEL_HEIGHT,
            FilterType::Triangle,
        );

        // NHWC layout, plain [0, 1] normalization
        let mut input_tensor =
            Array4::<f32>::zeros((1, MODEL_HEIGHT as usize, MODEL_WIDTH as usize, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input_tensor[[0, y as usize, x as usize, 0]] = pixel[0] as f32 / 255.0;
            input_tensor[[0, y as usize, x as usize, 1]] = pixel[1] as f32 / 255.0;
            input_tensor[[0, y as usize, x as usize, 2]] = pixel[2] as f32 / 255.0;
        }

        let shape = input_tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
        let data = input_tensor.into_raw_vec();
        let input_value = Value::from_array((shape, data))?;
        let inputs = ort::inputs!["input" => &input_value];
        let outputs = session.run(inputs)?;

        // Output is [1, 256, 256, 1]: already contiguous row-major confidence
        let (shape, data) = outputs["output"].try_extract_tensor::<f32>()?;
        let expected = (MODEL_WIDTH * MODEL_HEIGHT) as usize;
        let count: i64 = shape.iter().product();
        if count as usize != expected {
            return Err(anyhow!(
                "unexpected output shape {:?}, wanted {} elements",
                shape,
                expected
            ));
        }

        let mut mask: Vec<f32> = data.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        apply_threshold(&mut mask, &self.seg_config);
        Ok(mask)
    }
}

impl Default for SelfieBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationBackend for SelfieBackend {
    fn default_model_config(&self) -> ModelConfig {
        ModelConfig {
            model_path: PathBuf::from("models/selfie_segmenter.onnx"),
            intra_threads: 2,
        }
    }

    fn default_segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig::default()
    }

    fn load_model(&mut self, config: ModelConfig) {
        info!("Loading selfie segmentation model from {:?}", config.model_path);
        let (tx, rx) = mpsc::channel();
        let load_config = config.clone();
        thread::spawn(move || {
            let result = build_session(&load_config);
            let _ = tx.send(result);
        });
        self.pending = Some(rx);
        self.pending_config = Some(config);
    }

    fn set_segmentation_config(&mut self, config: SegmentationConfig) {
        self.seg_config = config;
    }

    fn segmentation_config(&self) -> SegmentationConfig {
        self.seg_config
    }

    fn model_config(&self) -> ModelConfig {
        self.model_config.clone()
    }

    fn mask_dimensions(&self) -> Option<(u32, u32)> {
        self.session.as_ref().map(|_| (MODEL_WIDTH, MODEL_HEIGHT))
    }

    fn analyze(&mut self, frame: Option<&RgbaImage>) -> Option<Vec<f32>> {
        self.poll_pending();
        if self.session.is_none() {
            return None;
        }
        let frame = frame?;

        match self.infer(frame) {
            Ok(mask) => Some(mask),
            Err(e) => {
                warn!("Selfie segmentation inference failed: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_without_model_is_none() {
        let mut backend = SelfieBackend::new();
        let frame = RgbaImage::new(4, 4);

        assert!(backend.analyze(Some(&frame)).is_none());
        assert!(backend.mask_dimensions().is_none());
    }

    #[test]
    fn test_default_configs_differ_from_modnet() {
        let selfie = SelfieBackend::new();
        let modnet = super::super::ModnetBackend::new();

        assert_ne!(
            selfie.default_model_config().model_path,
            modnet.default_model_config().model_path
        );
    }
}
