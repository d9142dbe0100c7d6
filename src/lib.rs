//! Calypso: real-time webcam virtual background processor
//!
//! Pulls frames from a live video source at a controlled cadence, runs
//! pluggable analyzers over each frame, composites pluggable renderers onto
//! a drawing surface, and exposes the composed result as a continuous output
//! stream. The shipped stages segment the subject with an ONNX model and
//! matte it over a substitute background.

pub mod analyze;
pub mod background;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod schedule;
pub mod segmentation;
pub mod source;
pub mod surface;
