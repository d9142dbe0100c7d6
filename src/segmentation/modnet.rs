//! MODNet portrait-matting backend.

use super::{apply_threshold, build_session, ModelConfig, SegmentationBackend, SegmentationConfig};
use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbaImage};
use ndarray::{Array4, Axis};
use ort::session::Session;
use ort::value::Value;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{info, warn};

/// MODNet input size (usually 512x512 for balance).
const MODEL_WIDTH: u32 = 512;
const MODEL_HEIGHT: u32 = 512;

/// Matting backend running a MODNet ONNX model. Produces a soft alpha matte
/// at the model's native 512x512 resolution.
pub struct ModnetBackend {
    session: Option<Session>,
    pending: Option<Receiver<Result<Session>>>,
    pending_config: Option<ModelConfig>,
    model_config: ModelConfig,
    seg_config: SegmentationConfig,
}

impl ModnetBackend {
    pub fn new() -> Self {
        Self {
            session: None,
            pending: None,
            pending_config: None,
            model_config: ModelConfig {
                model_path: PathBuf::from("models/modnet.onnx"),
                intra_threads: 4,
            },
            seg_config: SegmentationConfig::default(),
        }
    }

    /// Commits a finished load, if one is waiting.
    fn poll_pending(&mut self) {
        let Some(rx) = self.pending.take() else { return };
        match rx.try_recv() {
            Ok(Ok(session)) => {
                info!("MODNet model loaded");
                self.session = Some(session);
                if let Some(config) = self.pending_config.take() {
                    self.model_config = config;
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to load MODNet model: {:#}", e);
                self.pending_config = None;
            }
            Err(mpsc::TryRecvError::Empty) => {
                self.pending = Some(rx);
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!("MODNet model loader thread died");
                self.pending_config = None;
            }
        }
    }

    fn infer(&mut self, frame: &RgbaImage) -> Result<Vec<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("model not loaded"))?;

        // 1. Resize to the model input size and normalize to [-1, 1]
        let resized = image::imageops::resize(
            frame,
            MODEL_WIDTH,
            MODEL_HEIGHT,
            FilterType::Triangle,
        );

        let mut input_tensor =
            Array4::<f32>::zeros((1, 3, MODEL_HEIGHT as usize, MODEL_WIDTH as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let r = pixel[0] as f32 / 255.0;
            let g = pixel[1] as f32 / 255.0;
            let b = pixel[2] as f32 / 255.0;

            input_tensor[[0, 0, y as usize, x as usize]] = (r - 0.5) / 0.5;
            input_tensor[[0, 1, y as usize, x as usize]] = (g - 0.5) / 0.5;
            input_tensor[[0, 2, y as usize, x as usize]] = (b - 0.5) / 0.5;
        }

        // 2. Run inference
        let shape = input_tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
        let data = input_tensor.into_raw_vec();
        let input_value = Value::from_array((shape, data))?;
        let inputs = ort::inputs!["input" => &input_value];
        let outputs = session.run(inputs)?;

        // Output is [1, 1, 512, 512] (matte)
        let (shape, data) = outputs["output"].try_extract_tensor::<f32>()?;
        let output_tensor = Array4::from_shape_vec(
            (
                shape[0] as usize,
                shape[1] as usize,
                shape[2] as usize,
                shape[3] as usize,
            ),
            data.to_vec(),
        )?;

        // 3. Flatten to a clamped probability buffer
        let binding = output_tensor.index_axis(Axis(0), 0);
        let matte = binding.index_axis(Axis(0), 0);
        let mut mask = Vec::with_capacity((MODEL_WIDTH * MODEL_HEIGHT) as usize);
        for row in matte.outer_iter() {
            for val in row.iter() {
                mask.push(val.clamp(0.0, 1.0));
            }
        }

        apply_threshold(&mut mask, &self.seg_config);
        Ok(mask)
    }
}

impl Default for ModnetBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationBackend for ModnetBackend {
    fn default_model_config(&self) -> ModelConfig {
        ModelConfig {
            model_path: PathBuf::from("models/modnet.onnx"),
            intra_threads: 4,
        }
    }

    fn default_segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig::default()
    }

    fn load_model(&mut self, config: ModelConfig) {
        info!("Loading MODNet model from {:?}", config.model_path);
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
                warn!("MODNet inference failed: {:#}", e);
                None
            }
        }
    }
}
