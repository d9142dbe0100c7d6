//! Tick scheduling: pacing analysis and rendering against a target rate.

mod host;

pub use host::{ManualHost, RealtimeHost};

use serde::Deserialize;
use std::time::Duration;

/// How ticks are queued with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    /// Callback aligned with the display refresh.
    FrameSynced,
    /// Low-priority idle callback, falling back to frame-synced when the
    /// host has none.
    Idle,
    /// External timer keyed to `1000 / ideal_fps`, independent of display
    /// refresh.
    PrecisionTimer,
}

/// Pacing options, re-read by the scheduler on every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceOptions {
    pub strategy: SchedulingStrategy,
    /// Target rate for the precision timer strategy.
    pub ideal_fps: f64,
    /// Work runs on every n-th tick; the ticks between only advance the skip
    /// counter. Always >= 1.
    pub every_n_frames: u32,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::FrameSynced,
            ideal_fps: 30.0,
            every_n_frames: 1,
        }
    }
}

/// Partial update applied over the current options. Deserializable so config
/// hot-reload can carry it directly.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceUpdate {
    pub strategy: Option<SchedulingStrategy>,
    pub ideal_fps: Option<f64>,
    pub every_n_frames: Option<u32>,
}

impl PerformanceOptions {
    pub fn apply(&mut self, update: &PerformanceUpdate) {
        if let Some(strategy) = update.strategy {
            self.strategy = strategy;
        }
        if let Some(fps) = update.ideal_fps {
            self.ideal_fps = fps;
        }
        if let Some(n) = update.every_n_frames {
            self.every_n_frames = n.max(1);
        }
    }
}

/// Timing measured over the most recent worked tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTiming {
    pub analyze_ms: f64,
    pub render_ms: f64,
    pub total_ms: f64,
    /// `1000 / total_ms`, capped at 1000 when the tick was too fast to
    /// measure.
    pub fps: f64,
}

impl FrameTiming {
    pub(crate) fn from_measurements(analyze_ms: f64, render_ms: f64) -> Self {
        let total_ms = analyze_ms + render_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 1000.0 };
        Self {
            analyze_ms,
            render_ms,
            total_ms,
            fps,
        }
    }
}

/// A queued tick callback, tagged with the mechanism that queued it so
/// cancellation always goes through the matching one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTick {
    Frame(u64),
    Idle(u64),
    Timer(u64),
}

/// Host scheduling primitives the pipeline runs on. Each `schedule_*` queues
/// at most one pending callback and returns its id.
pub trait TickHost {
    /// Queues a callback aligned with the next display refresh.
    fn schedule_frame(&mut self) -> u64;

    /// Queues a low-priority idle callback, or `None` when the host exposes
    /// no idle scheduling.
    fn schedule_idle(&mut self) -> Option<u64>;

    /// Queues a callback after `delay`.
    fn schedule_timer(&mut self, delay: Duration) -> u64;

    fn cancel_frame(&mut self, id: u64);
    fn cancel_idle(&mut self, id: u64);
    fn cancel_timer(&mut self, id: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    /// Not running, nothing queued.
    Idle,
    /// A tick callback is queued with the host.
    Scheduled(ScheduledTick),
    /// A tick is executing analyze+render.
    Ticking,
}

/// Drives the tick loop: decides when work runs, applies the frame-skip
/// policy, and re-queues itself with the host after every tick.
pub struct FrameScheduler {
    state: SchedulerState,
    running: bool,
    skip_counter: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            running: false,
            skip_counter: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sets the running flag and queues the first tick unless one is already
    /// pending.
    pub fn start(&mut self, host: &mut dyn TickHost, options: &PerformanceOptions) {
        self.running = true;
        if self.state == SchedulerState::Idle {
            self.schedule(host, options);
        }
    }

    /// Clears the running flag and cancels the pending callback through the
    /// mechanism that queued it. A tick already executing is not interrupted;
    /// only its re-scheduling is suppressed.
    pub fn stop(&mut self, host: &mut dyn TickHost) {
        self.running = false;
        if let SchedulerState::Scheduled(tick) = self.state {
            match tick {
                ScheduledTick::Frame(id) => host.cancel_frame(id),
                ScheduledTick::Idle(id) => host.cancel_idle(id),
                ScheduledTick::Timer(id) => host.cancel_timer(id),
            }
            self.state = SchedulerState::Idle;
        }
    }

    /// Enters a tick. Advances the skip counter and reports whether this
    /// tick should run analyze+render: only every n-th tick, and only when
    /// the caller reports work is possible (source attached, live consumer).
    pub fn begin_tick(&mut self, work_possible: bool, every_n_frames: u32) -> bool {
        self.state = SchedulerState::Ticking;
        let due = self.skip_counter % u64::from(every_n_frames.max(1)) == 0;
        self.skip_counter += 1;
        due && work_possible
    }

    /// Leaves a tick and re-queues the next one. This happens while running
    /// regardless of the tick's outcome, so a skipped or failed tick never
    /// stalls the loop.
    pub fn finish_tick(&mut self, host: &mut dyn TickHost, options: &PerformanceOptions) {
        self.state = SchedulerState::Idle;
        if self.running {
            self.schedule(host, options);
        }
    }

    fn schedule(&mut self, host: &mut dyn TickHost, options: &PerformanceOptions) {
        if matches!(self.state, SchedulerState::Scheduled(_)) {
            return;
        }
        let tick = match options.strategy {
            SchedulingStrategy::FrameSynced => ScheduledTick::Frame(host.schedule_frame()),
            SchedulingStrategy::Idle => match host.schedule_idle() {
                Some(id) => ScheduledTick::Idle(id),
                None => ScheduledTick::Frame(host.schedule_frame()),
            },
            SchedulingStrategy::PrecisionTimer => {
                let millis = 1000.0 / options.ideal_fps.max(1.0);
                ScheduledTick::Timer(host.schedule_timer(Duration::from_secs_f64(millis / 1000.0)))
            }
        };
        self.state = SchedulerState::Scheduled(tick);
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(strategy: SchedulingStrategy) -> PerformanceOptions {
        PerformanceOptions {
            strategy,
            ..PerformanceOptions::default()
        }
    }

    /// Pumps one full tick against the host, returning whether work was due.
    fn pump(
        scheduler: &mut FrameScheduler,
        host: &mut ManualHost,
        opts: &PerformanceOptions,
        work_possible: bool,
    ) -> bool {
        assert!(host.fire());
        let due = scheduler.begin_tick(work_possible, opts.every_n_frames);
        scheduler.finish_tick(host, opts);
        due
    }

    #[test]
    fn test_every_n_frames_three_works_three_of_nine() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        let opts = PerformanceOptions {
            every_n_frames: 3,
            ..PerformanceOptions::default()
        };

        scheduler.start(&mut host, &opts);
        let worked = (0..9)
            .filter(|_| pump(&mut scheduler, &mut host, &opts, true))
            .count();

        assert_eq!(worked, 3);
        scheduler.stop(&mut host);
    }

    #[test]
    fn test_skipped_ticks_still_reschedule() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        let opts = options(SchedulingStrategy::FrameSynced);

        scheduler.start(&mut host, &opts);
        for _ in 0..4 {
            // No source/consumer: never due, but the loop keeps going.
            assert!(!pump(&mut scheduler, &mut host, &opts, false));
        }
        assert_eq!(host.frame_schedules, 5);
    }

    #[test]
    fn test_stop_cancels_with_matching_mechanism() {
        for strategy in [
            SchedulingStrategy::FrameSynced,
            SchedulingStrategy::PrecisionTimer,
        ] {
            let mut scheduler = FrameScheduler::new();
            let mut host = ManualHost::new();
            let opts = options(strategy);

            scheduler.start(&mut host, &opts);
            scheduler.stop(&mut host);

            assert!(!host.fire());
            match strategy {
                SchedulingStrategy::FrameSynced => assert_eq!(host.frame_cancels, 1),
                SchedulingStrategy::PrecisionTimer => assert_eq!(host.timer_cancels, 1),
                SchedulingStrategy::Idle => unreachable!(),
            }
        }
    }

    #[test]
    fn test_idle_strategy_falls_back_to_frame_synced() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        host.idle_supported = false;
        let opts = options(SchedulingStrategy::Idle);

        scheduler.start(&mut host, &opts);
        assert_eq!(host.frame_schedules, 1);
        assert_eq!(host.idle_schedules, 0);

        // With idle support the idle queue is used, and cancelled as idle.
        let mut host = ManualHost::new();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(&mut host, &opts);
        assert_eq!(host.idle_schedules, 1);
        scheduler.stop(&mut host);
        assert_eq!(host.idle_cancels, 1);
    }

    #[test]
    fn test_stop_during_tick_suppresses_reschedule() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        let opts = options(SchedulingStrategy::FrameSynced);

        scheduler.start(&mut host, &opts);
        assert!(host.fire());
        let due = scheduler.begin_tick(true, 1);
        assert!(due);

        // Stop lands while the tick executes: the tick completes, nothing
        // further is queued.
        scheduler.stop(&mut host);
        scheduler.finish_tick(&mut host, &opts);

        assert!(!host.fire());
        assert_eq!(host.frame_schedules, 1);
    }

    #[test]
    fn test_start_twice_schedules_once() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        let opts = options(SchedulingStrategy::FrameSynced);

        scheduler.start(&mut host, &opts);
        scheduler.start(&mut host, &opts);

        assert_eq!(host.frame_schedules, 1);
    }

    #[test]
    fn test_precision_timer_delay_tracks_ideal_fps() {
        let mut scheduler = FrameScheduler::new();
        let mut host = ManualHost::new();
        let opts = PerformanceOptions {
            strategy: SchedulingStrategy::PrecisionTimer,
            ideal_fps: 50.0,
            every_n_frames: 1,
        };

        scheduler.start(&mut host, &opts);
        assert_eq!(host.last_timer_delay, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_frame_timing_fps() {
        let timing = FrameTiming::from_measurements(6.0, 4.0);
        assert_eq!(timing.total_ms, 10.0);
        assert_eq!(timing.fps, 100.0);

        // Immeasurably fast ticks report the sentinel upper bound.
        let timing = FrameTiming::from_measurements(0.0, 0.0);
        assert_eq!(timing.fps, 1000.0);
    }

    #[test]
    fn test_performance_update_is_partial_and_clamped() {
        let mut opts = PerformanceOptions::default();
        opts.apply(&PerformanceUpdate {
            every_n_frames: Some(0),
            ..PerformanceUpdate::default()
        });
        assert_eq!(opts.every_n_frames, 1);
        assert_eq!(opts.strategy, SchedulingStrategy::FrameSynced);

        opts.apply(&PerformanceUpdate {
            strategy: Some(SchedulingStrategy::PrecisionTimer),
            ideal_fps: Some(24.0),
            every_n_frames: None,
        });
        assert_eq!(opts.strategy, SchedulingStrategy::PrecisionTimer);
        assert_eq!(opts.ideal_fps, 24.0);
        assert_eq!(opts.every_n_frames, 1);
    }
}
