//! Output streams: composed surface pixels exposed to external consumers.

mod ffmpeg;

pub use ffmpeg::{FfmpegSink, FfmpegSinkConfig};

use image::RgbaImage;
use std::sync::{Arc, Mutex, Weak};

type EndedCallback = Box<dyn FnOnce() + Send>;

struct TrackState {
    latest: Option<Arc<RgbaImage>>,
    ended: bool,
    callbacks: Vec<EndedCallback>,
}

/// A live handle onto the pipeline's composed output.
///
/// Consumers sample the most recent frame with [`latest`](Self::latest);
/// frames are not queued. Ending is explicit and observable: the ended
/// notification fires exactly once, whether the stream is stopped by the
/// consumer or simply dropped.
pub struct OutputStream {
    state: Arc<Mutex<TrackState>>,
}

impl OutputStream {
    /// The most recently published frame, if any tick has produced one.
    pub fn latest(&self) -> Option<Arc<RgbaImage>> {
        self.state.lock().unwrap().latest.clone()
    }

    /// Registers a callback for the ended notification. On an already-ended
    /// stream the callback fires immediately.
    pub fn on_ended(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap();
        if state.ended {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Ends the stream. The pipeline stops publishing to it and the ended
    /// notification fires.
    pub fn stop(&self) {
        end_track(&self.state);
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().unwrap().ended
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        end_track(&self.state);
    }
}

fn end_track(state: &Arc<Mutex<TrackState>>) {
    let callbacks = {
        let mut state = state.lock().unwrap();
        if state.ended {
            return;
        }
        state.ended = true;
        state.latest = None;
        std::mem::take(&mut state.callbacks)
    };
    // Fired outside the lock; a callback may inspect the stream.
    for callback in callbacks {
        callback();
    }
}

/// The pipeline's book of handed-out streams. Holds only weak references:
/// a dropped consumer ends its own stream.
pub(crate) struct TrackSet {
    tracks: Vec<Weak<Mutex<TrackState>>>,
}

impl TrackSet {
    pub(crate) fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    pub(crate) fn create_stream(&mut self) -> OutputStream {
        let state = Arc::new(Mutex::new(TrackState {
            latest: None,
            ended: false,
            callbacks: Vec::new(),
        }));
        self.tracks.push(Arc::downgrade(&state));
        OutputStream { state }
    }

    /// Whether any handed-out stream is still live. Prunes dead entries.
    pub(crate) fn has_live(&mut self) -> bool {
        self.tracks.retain(|track| match track.upgrade() {
            Some(state) => !state.lock().unwrap().ended,
            None => false,
        });
        !self.tracks.is_empty()
    }

    /// Publishes a frame snapshot to every live stream.
    pub(crate) fn publish(&mut self, frame: Arc<RgbaImage>) {
        for track in &self.tracks {
            if let Some(state) = track.upgrade() {
                let mut state = state.lock().unwrap();
                if !state.ended {
                    state.latest = Some(frame.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_stop_fires_ended_exactly_once() {
        let mut tracks = TrackSet::new();
        let stream = tracks.create_stream();

        let fired = Arc::new(AtomicU32::new(0));
        let observer = fired.clone();
        stream.on_ended(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        stream.stop();
        stream.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracks.has_live());

        // Dropping after an explicit stop does not fire again.
        drop(stream);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_fires_ended() {
        let mut tracks = TrackSet::new();
        let stream = tracks.create_stream();

        let fired = Arc::new(AtomicU32::new(0));
        let observer = fired.clone();
        stream.on_ended(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        drop(stream);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracks.has_live());
    }

    #[test]
    fn test_on_ended_after_end_fires_immediately() {
        let mut tracks = TrackSet::new();
        let stream = tracks.create_stream();
        stream.stop();

        let fired = Arc::new(AtomicU32::new(0));
        let observer = fired.clone();
        stream.on_ended(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_reaches_live_streams_only() {
        let mut tracks = TrackSet::new();
        let live = tracks.create_stream();
        let stopped = tracks.create_stream();
        stopped.stop();

        tracks.publish(Arc::new(RgbaImage::new(2, 2)));

        assert!(live.latest().is_some());
        assert!(stopped.latest().is_none());
        assert!(tracks.has_live());
    }
}
