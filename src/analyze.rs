//! Frame analyzers and the ordered set that runs them each tick.

use anyhow::Result;
use image::RgbaImage;
use std::any::Any;
use std::collections::HashMap;
use tracing::warn;

/// Shared store of per-analyzer results.
///
/// An entry is created on an analyzer's first successful run and overwritten
/// in place afterwards, so renderers always observe the freshest value a
/// stage ever produced. Skipped and failed runs leave the previous entry
/// untouched.
pub struct AnalyzerResults {
    entries: HashMap<String, Box<dyn Any + Send>>,
}

impl AnalyzerResults {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Typed read access to an analyzer's last result.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries.get(name)?.downcast_ref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn put(&mut self, name: &str, value: Box<dyn Any + Send>) {
        if let Some(slot) = self.entries.get_mut(name) {
            *slot = value;
            return;
        }
        self.entries.insert(name.to_string(), value);
    }
}

/// Pipeline facts handed to analyzers alongside the frame.
pub struct AnalyzeContext {
    /// Output surface width, the fallback for results without an intrinsic
    /// resolution.
    pub output_width: u32,
    /// Output surface height.
    pub output_height: u32,
}

/// A runnable analysis stage.
pub trait FrameAnalyzer: Any {
    /// Inspects the frame and produces this stage's result. `Ok(None)` means
    /// "nothing new this tick" and keeps the previous result visible.
    fn analyze(
        &mut self,
        frame: Option<&RgbaImage>,
        ctx: &AnalyzeContext,
    ) -> Result<Option<Box<dyn Any + Send>>>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct AnalyzerEntry {
    name: String,
    enabled: bool,
    stage: Box<dyn FrameAnalyzer>,
}

/// Ordered, name-keyed collection of analyzers, run once per tick.
pub struct AnalyzerSet {
    entries: Vec<AnalyzerEntry>,
    results: AnalyzerResults,
}

impl AnalyzerSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            results: AnalyzerResults::new(),
        }
    }

    /// Adds a stage under `name`, enabled. Re-adding a name replaces the
    /// stage in its existing position.
    pub fn add(&mut self, name: impl Into<String>, stage: Box<dyn FrameAnalyzer>) {
        let name = name.into();
        match self.entries.iter().position(|e| e.name == name) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.stage = stage;
                entry.enabled = true;
            }
            None => self.entries.push(AnalyzerEntry {
                name,
                enabled: true,
                stage,
            }),
        }
    }

    /// Removes and returns the stage registered under `name`. Its last result
    /// stays in the result store.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn FrameAnalyzer>> {
        let idx = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(idx).stage)
    }

    /// Flips a stage's enabled flag; a disabled stage is skipped without
    /// being invoked. Returns false for unknown names.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Typed access to a stage, for reconfiguring it in place.
    pub fn get_mut<T: FrameAnalyzer>(&mut self, name: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)?
            .stage
            .as_any_mut()
            .downcast_mut()
    }

    pub fn results(&self) -> &AnalyzerResults {
        &self.results
    }

    /// Runs enabled stages in registration order. A failing stage is logged
    /// and does not stop the stages after it.
    pub fn run(&mut self, frame: Option<&RgbaImage>, ctx: &AnalyzeContext) {
        let Self { entries, results } = self;
        for entry in entries.iter_mut() {
            if !entry.enabled {
                continue;
            }
            match entry.stage.analyze(frame, ctx) {
                Ok(Some(value)) => results.put(&entry.name, value),
                Ok(None) => {}
                Err(e) => warn!("Analyzer '{}' failed: {:#}", entry.name, e),
            }
        }
    }
}

impl Default for AnalyzerSet {
    fn default() -> Self {
        Self::new()
    }
}
