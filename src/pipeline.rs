//! The frame-processing pipeline facade.

use crate::analyze::{AnalyzeContext, AnalyzerSet, FrameAnalyzer};
use crate::output::{OutputStream, TrackSet};
use crate::render::{FrameRenderer, RenderChain};
use crate::schedule::{
    FrameScheduler, FrameTiming, PerformanceOptions, PerformanceUpdate, TickHost,
};
use crate::source::FrameSource;
use crate::surface::SurfaceManager;
use std::sync::Arc;
use std::time::Instant;

/// Pulls frames from an attached source at the scheduler's cadence, runs the
/// analyzer set, composites the render chain onto the surfaces, and publishes
/// the output surface to every live output stream.
///
/// The pipeline is single-threaded and host-driven: the embedding calls
/// [`tick`](Self::tick) whenever the host callback queued through the
/// [`TickHost`] fires. Ticks never overlap, which makes the analyzer results
/// and the surfaces single-flight by construction.
pub struct CameraPipeline {
    analyzers: AnalyzerSet,
    renderers: RenderChain,
    surfaces: SurfaceManager,
    scheduler: FrameScheduler,
    options: PerformanceOptions,
    source: Option<Arc<dyn FrameSource>>,
    tracks: TrackSet,
    passthrough: bool,
    timing: FrameTiming,
}

impl CameraPipeline {
    pub fn new() -> Self {
        Self {
            analyzers: AnalyzerSet::new(),
            renderers: RenderChain::new(),
            surfaces: SurfaceManager::new(),
            scheduler: FrameScheduler::new(),
            options: PerformanceOptions::default(),
            source: None,
            tracks: TrackSet::new(),
            passthrough: false,
            timing: FrameTiming::default(),
        }
    }

    /// Starts the tick loop, queueing the first tick with the host.
    pub fn start(&mut self, host: &mut dyn TickHost) {
        self.scheduler.start(host, &self.options);
    }

    /// Stops the tick loop. The pending host callback is cancelled; a tick
    /// already executing finishes but does not reschedule.
    pub fn stop(&mut self, host: &mut dyn TickHost) {
        self.scheduler.stop(host);
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Attaches the frame source and sizes every surface to it.
    pub fn set_source(&mut self, source: Arc<dyn FrameSource>) {
        let (width, height) = source.dimensions();
        self.surfaces.set_dimensions(width.max(1), height.max(1));
        self.source = Some(source);
    }

    pub fn clear_source(&mut self) {
        self.source = None;
    }

    /// In passthrough mode analyzers and renderers are bypassed and the raw
    /// frame is forwarded unchanged.
    pub fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
    }

    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    /// Applies a partial options update; the scheduler picks it up on the
    /// next tick.
    pub fn set_performance_options(&mut self, update: &PerformanceUpdate) {
        self.options.apply(update);
    }

    pub fn performance_options(&self) -> PerformanceOptions {
        self.options
    }

    /// Timing of the most recent worked tick.
    pub fn performance(&self) -> FrameTiming {
        self.timing
    }

    /// Hands out a new live output stream. While at least one stream is
    /// live, ticks run analysis and rendering; with none, they only advance
    /// the skip counter.
    pub fn output_stream(&mut self) -> OutputStream {
        self.tracks.create_stream()
    }

    pub fn add_analyzer(&mut self, name: impl Into<String>, stage: Box<dyn FrameAnalyzer>) {
        self.analyzers.add(name, stage);
    }

    pub fn remove_analyzer(&mut self, name: &str) -> Option<Box<dyn FrameAnalyzer>> {
        self.analyzers.remove(name)
    }

    pub fn set_analyzer_enabled(&mut self, name: &str, enabled: bool) -> bool {
        self.analyzers.set_enabled(name, enabled)
    }

    /// Typed access to an analyzer stage, for reconfiguring it in place.
    pub fn analyzer_mut<T: FrameAnalyzer>(&mut self, name: &str) -> Option<&mut T> {
        self.analyzers.get_mut(name)
    }

    pub fn add_renderer(&mut self, stage: Box<dyn FrameRenderer>) -> usize {
        self.renderers.add(stage)
    }

    pub fn remove_renderer(&mut self, index: usize) -> Option<Box<dyn FrameRenderer>> {
        self.renderers.remove(index)
    }

    pub fn set_renderer_enabled(&mut self, index: usize, enabled: bool) -> bool {
        self.renderers.set_enabled(index, enabled)
    }

    /// Typed access to a renderer stage, for reconfiguring it in place.
    pub fn renderer_mut<T: FrameRenderer>(&mut self, index: usize) -> Option<&mut T> {
        self.renderers.get_mut(index)
    }

    /// Executes one tick. Called by the embedding when the queued host
    /// callback fires.
    ///
    /// Work (analyze + render + publish) runs only on every n-th tick and
    /// only while a source is attached and a live output stream exists;
    /// other ticks just advance the skip counter. The next tick is queued at
    /// the end either way.
    pub fn tick(&mut self, host: &mut dyn TickHost) {
        let work_possible = self.source.is_some() && self.tracks.has_live();
        let due = self
            .scheduler
            .begin_tick(work_possible, self.options.every_n_frames);
        if due {
            self.run_work();
        }
        self.scheduler.finish_tick(host, &self.options);
    }

    fn run_work(&mut self) {
        let start = Instant::now();

        let frame = self.source.as_ref().and_then(|s| s.current_frame());
        let rgba = frame.as_ref().map(|f| f.to_rgba_image());

        let Self {
            analyzers,
            renderers,
            surfaces,
            tracks,
            passthrough,
            ..
        } = self;

        if !*passthrough {
            let ctx = AnalyzeContext {
                output_width: surfaces.width(),
                output_height: surfaces.height(),
            };
            analyzers.run(rgba.as_ref(), &ctx);
        }
        let analyzed = Instant::now();

        surfaces.begin_frame(rgba.as_ref());
        if !*passthrough {
            renderers.run(analyzers.results(), rgba.as_ref(), surfaces);
        }
        surfaces.finish_frame();

        if let Some(snapshot) = surfaces.output_snapshot() {
            tracks.publish(Arc::new(snapshot));
        }
        let rendered = Instant::now();

        self.timing = FrameTiming::from_measurements(
            (analyzed - start).as_secs_f64() * 1000.0,
            (rendered - analyzed).as_secs_f64() * 1000.0,
        );
    }
}

impl Default for CameraPipeline {
    fn default() -> Self {
        Self::new()
    }
}
