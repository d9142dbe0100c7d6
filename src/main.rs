//! Calypso CLI: webcam virtual background replacement.

mod config;

use anyhow::{anyhow, Result};
use calypso::background::VirtualBackgroundRenderer;
use calypso::output::{FfmpegSink, FfmpegSinkConfig};
use calypso::pipeline::CameraPipeline;
use calypso::schedule::RealtimeHost;
use calypso::segmentation::{
    self, ModelConfig, SegmentationAnalyzer, SegmentationConfig, SEGMENTATION_RESULT,
};
use calypso::source::{CameraConfig, CameraSource, FrameSource, TestPatternSource};
use clap::Parser;
use config::{Config, ConfigWatcher};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Replace your webcam background in real time.
#[derive(Parser, Debug)]
#[command(name = "calypso")]
#[command(about = "Matte yourself over a virtual background")]
struct Args {
    /// Path to a YAML config file (watched for changes)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device index
    #[arg(short, long)]
    input: Option<u32>,

    /// Segmentation backend id (modnet, selfie)
    #[arg(long)]
    backend: Option<String>,

    /// Path to the segmentation model
    #[arg(long)]
    model: Option<PathBuf>,

    /// ffmpeg output target (file, /dev/video10, rtmp URL)
    #[arg(short, long)]
    output: Option<String>,

    /// Use a synthetic test pattern instead of a camera
    #[arg(long)]
    no_camera: bool,

    /// Forward frames unchanged, bypassing analysis and rendering
    #[arg(long)]
    passthrough: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    if let Err(e) = segmentation::init_runtime() {
        warn!("Failed to initialize ONNX Runtime: {}. Segmentation will be unavailable.", e);
    }

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        match CameraSource::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                eprintln!("Failed to list devices: {}", e);
            }
        }
        return Ok(());
    }

    let mut cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(device) = args.input {
        cfg.camera.device = device;
    }
    if let Some(backend) = &args.backend {
        cfg.segmentation.backend = Some(backend.clone());
    }
    if let Some(model) = &args.model {
        cfg.segmentation.model_path = Some(model.clone());
    }
    if let Some(target) = &args.output {
        cfg.output.target = Some(target.clone());
    }

    info!("Starting calypso...");

    // Frame source
    let source: Arc<dyn FrameSource> = if args.no_camera {
        info!("Using test pattern source");
        Arc::new(TestPatternSource::new(cfg.camera.width, cfg.camera.height))
    } else {
        info!("Opening camera device {}...", cfg.camera.device);
        let camera = CameraSource::open(CameraConfig {
            device_index: cfg.camera.device,
            width: cfg.camera.width,
            height: cfg.camera.height,
            fps: cfg.camera.fps,
        })?;
        Arc::new(camera)
    };
    let (width, height) = source.dimensions();

    // Pipeline with the virtual background stages
    let mut pipeline = CameraPipeline::new();
    pipeline.set_source(source);
    pipeline.set_passthrough(args.passthrough);
    pipeline.set_performance_options(&cfg.performance);

    let analyzer = match cfg.segmentation.backend.as_deref() {
        Some(id) => SegmentationAnalyzer::with_backend(id)
            .map_err(|e| anyhow!("Invalid segmentation backend: {}", e))?,
        None => SegmentationAnalyzer::new(),
    };
    pipeline.add_analyzer(SEGMENTATION_RESULT, Box::new(analyzer));
    let renderer_idx = pipeline.add_renderer(Box::new(VirtualBackgroundRenderer::new()));

    apply_segmentation(&mut pipeline, &cfg, true);
    apply_background(&mut pipeline, renderer_idx, &cfg);

    // Output
    let stream = pipeline.output_stream();
    let mut sink = match &cfg.output.target {
        Some(target) => Some(FfmpegSink::new(FfmpegSinkConfig {
            width,
            height,
            fps: cfg.camera.fps,
            destination: target.clone(),
        })?),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut watcher = ConfigWatcher::new(args.config.clone());
    let mut host = RealtimeHost::new(f64::from(cfg.camera.fps));
    let mut last_written: Option<Arc<RgbaImage>> = None;

    pipeline.start(&mut host);
    info!("Pipeline running at {}x{}", width, height);

    while running.load(Ordering::SeqCst) {
        if !host.wait() {
            break;
        }
        pipeline.tick(&mut host);

        // Push newly composed frames into the sink; skipped ticks republish
        // nothing.
        if let Some(sink) = &mut sink {
            if let Some(frame) = stream.latest() {
                let is_new = !last_written
                    .as_ref()
                    .is_some_and(|last| Arc::ptr_eq(last, &frame));
                if is_new {
                    if let Err(e) = sink.write_frame(&frame) {
                        error!("Output error: {}", e);
                    }
                    last_written = Some(frame);
                }
            }
        }

        if let Some(watcher) = &mut watcher {
            if let Some(new_cfg) = watcher.check_for_changes() {
                apply_runtime_config(&mut pipeline, renderer_idx, &new_cfg, &cfg);
                cfg = new_cfg;
            }
        }
    }

    pipeline.stop(&mut host);
    stream.stop();
    if let Some(mut sink) = sink {
        if let Err(e) = sink.finish() {
            warn!("ffmpeg sink did not exit cleanly: {}", e);
        }
    }
    info!("Stopped");
    Ok(())
}

/// Configures the segmentation analyzer from the config and (re)starts the
/// model load when asked to.
fn apply_segmentation(pipeline: &mut CameraPipeline, cfg: &Config, load: bool) {
    let Some(analyzer) = pipeline.analyzer_mut::<SegmentationAnalyzer>(SEGMENTATION_RESULT) else {
        return;
    };

    analyzer.set_segmentation_config(SegmentationConfig {
        foreground_threshold: cfg.segmentation.foreground_threshold,
    });

    if load {
        let model_config = cfg.segmentation.model_path.clone().map(|model_path| {
            let mut config: ModelConfig = analyzer.model_config();
            config.model_path = model_path;
            config
        });
        analyzer.load_model(model_config);
    }
}

/// Configures the background renderer from the config.
fn apply_background(pipeline: &mut CameraPipeline, renderer_idx: usize, cfg: &Config) {
    let background = match cfg.background.to_background() {
        Ok(background) => background,
        Err(e) => {
            error!("Invalid background config: {:#}", e);
            return;
        }
    };
    if let Some(renderer) = pipeline.renderer_mut::<VirtualBackgroundRenderer>(renderer_idx) {
        renderer.set_background(background);
    }
}

/// Applies a hot-reloaded config to the running pipeline.
fn apply_runtime_config(
    pipeline: &mut CameraPipeline,
    renderer_idx: usize,
    new_cfg: &Config,
    old_cfg: &Config,
) {
    pipeline.set_performance_options(&new_cfg.performance);
    apply_background(pipeline, renderer_idx, new_cfg);

    let backend_changed = new_cfg.segmentation.backend != old_cfg.segmentation.backend;
    if backend_changed {
        if let Some(id) = new_cfg.segmentation.backend.as_deref() {
            if let Some(analyzer) =
                pipeline.analyzer_mut::<SegmentationAnalyzer>(SEGMENTATION_RESULT)
            {
                if let Err(e) = analyzer.set_backend(id) {
                    error!("Cannot switch segmentation backend: {}", e);
                }
            }
        }
    }

    let model_changed = new_cfg.segmentation.model_path != old_cfg.segmentation.model_path;
    apply_segmentation(pipeline, new_cfg, backend_changed || model_changed);
}
