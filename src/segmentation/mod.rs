//! Foreground segmentation: the analyzer stage, the backend contract, and
//! the ONNX-based backends.

mod modnet;
mod selfie;

pub use modnet::ModnetBackend;
pub use selfie::SelfieBackend;

use crate::analyze::{AnalyzeContext, FrameAnalyzer};
use crate::registry::{ConfigurationError, Registry};
use anyhow::Result;
use image::RgbaImage;
use std::any::Any;
use std::path::PathBuf;

/// Id of the MODNet portrait-matting backend.
pub const MODNET_BACKEND: &str = "modnet";
/// Id of the selfie-segmentation backend.
pub const SELFIE_BACKEND: &str = "selfie";
/// Name under which the analyzer publishes its result.
pub const SEGMENTATION_RESULT: &str = "segmentation";

/// Initialize the ONNX Runtime environment.
/// This should be called once at startup.
pub fn init_runtime() -> Result<()> {
    ort::init().with_name("calypso").commit();
    Ok(())
}

/// Where the model artifact comes from and how its session is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub intra_threads: usize,
}

/// Mask post-processing knobs, applied synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentationConfig {
    /// When set, probabilities are binarized against this threshold instead
    /// of being passed through as a soft matte.
    pub foreground_threshold: Option<f32>,
}

/// Per-tick product of the segmentation analyzer: a foreground probability
/// buffer at the backend's native resolution. `data` is `None` while the
/// backend has nothing to report (model loading, source not ready).
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub data: Option<Vec<f32>>,
    pub width: u32,
    pub height: u32,
}

/// A segmentation strategy the analyzer can switch between at runtime.
pub trait SegmentationBackend {
    fn default_model_config(&self) -> ModelConfig;

    fn default_segmentation_config(&self) -> SegmentationConfig;

    /// Begins loading the model artifact on a worker thread. The session and
    /// the model configuration are committed only when the load succeeds;
    /// until then `analyze` keeps returning `None`.
    fn load_model(&mut self, config: ModelConfig);

    /// Replaces the segmentation configuration immediately.
    fn set_segmentation_config(&mut self, config: SegmentationConfig);

    fn segmentation_config(&self) -> SegmentationConfig;

    /// The committed model configuration.
    fn model_config(&self) -> ModelConfig;

    /// Native mask resolution, once the model is loaded.
    fn mask_dimensions(&self) -> Option<(u32, u32)>;

    /// Produces a probability buffer of `mask_dimensions()` elements, or
    /// `None` when the model is not loaded or no frame is available. Never
    /// fails the tick: inference errors are logged and reported as `None`.
    fn analyze(&mut self, frame: Option<&RgbaImage>) -> Option<Vec<f32>>;
}

/// Binarizes a probability buffer in place when the configuration asks for a
/// hard threshold. Backends call this after clamping their raw output.
pub(crate) fn apply_threshold(mask: &mut [f32], config: &SegmentationConfig) {
    if let Some(threshold) = config.foreground_threshold {
        for p in mask.iter_mut() {
            *p = if *p >= threshold { 1.0 } else { 0.0 };
        }
    }
}

/// Builds an ONNX session from a model configuration. Runs on the backend's
/// loader thread.
pub(crate) fn build_session(config: &ModelConfig) -> Result<ort::session::Session> {
    use ort::session::{builder::GraphOptimizationLevel, Session};

    if !config.model_path.exists() {
        anyhow::bail!("model file not found at {:?}", config.model_path);
    }

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| -> ort::Error { e.into() })?
        .with_intra_threads(config.intra_threads)
        .map_err(|e| -> ort::Error { e.into() })?
        .commit_from_file(&config.model_path)?;
    Ok(session)
}

/// Analyzer stage wrapping a registry of segmentation backends.
pub struct SegmentationAnalyzer {
    backends: Registry<Box<dyn SegmentationBackend>>,
}

impl SegmentationAnalyzer {
    /// Builds the analyzer with the shipped backends, MODNet active.
    pub fn new() -> Self {
        let mut backends = Registry::new(
            "segmentation backend",
            MODNET_BACKEND,
            Box::new(ModnetBackend::new()) as Box<dyn SegmentationBackend>,
        );
        backends.register(SELFIE_BACKEND, Box::new(SelfieBackend::new()));
        Self { backends }
    }

    /// Builds the analyzer with `initial` as the active backend.
    pub fn with_backend(initial: &str) -> Result<Self, ConfigurationError> {
        let mut analyzer = Self::new();
        analyzer.backends.select(initial)?;
        Ok(analyzer)
    }

    /// Registers an additional backend under `id`.
    pub fn register_backend(&mut self, id: impl Into<String>, backend: Box<dyn SegmentationBackend>) {
        self.backends.register(id, backend);
    }

    /// Switches the active backend. The newly active backend's visible
    /// segmentation configuration is reset to its defaults.
    pub fn set_backend(&mut self, id: &str) -> Result<(), ConfigurationError> {
        self.backends.select(id)?;
        let (_, backend) = self.backends.current_mut();
        let defaults = backend.default_segmentation_config();
        backend.set_segmentation_config(defaults);
        Ok(())
    }

    pub fn backend_id(&self) -> &str {
        self.backends.active_id()
    }

    /// Starts loading a model on the active backend; `None` loads the
    /// backend's current model configuration.
    pub fn load_model(&mut self, config: Option<ModelConfig>) {
        let (_, backend) = self.backends.current_mut();
        let config = config.unwrap_or_else(|| backend.model_config());
        backend.load_model(config);
    }

    pub fn set_segmentation_config(&mut self, config: SegmentationConfig) {
        self.backends.current_mut().1.set_segmentation_config(config);
    }

    pub fn segmentation_config(&self) -> SegmentationConfig {
        self.backends.current().1.segmentation_config()
    }

    pub fn model_config(&self) -> ModelConfig {
        self.backends.current().1.model_config()
    }
}

impl Default for SegmentationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAnalyzer for SegmentationAnalyzer {
    fn analyze(
        &mut self,
        frame: Option<&RgbaImage>,
        ctx: &AnalyzeContext,
    ) -> Result<Option<Box<dyn Any + Send>>> {
        let (_, backend) = self.backends.current_mut();
        let data = backend.analyze(frame);
        let (width, height) = backend
            .mask_dimensions()
            .unwrap_or((ctx.output_width, ctx.output_height));

        Ok(Some(Box::new(SegmentationResult {
            data,
            width,
            height,
        })))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
