//! Tick host implementations.

use super::TickHost;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Frame,
    Idle,
    Timer,
}

/// Wall-clock host for real-time runs: frame-synced callbacks land on the
/// next display-refresh boundary, timers on `now + delay`. The embedding
/// loop alternates `wait()` and `CameraPipeline::tick`.
pub struct RealtimeHost {
    refresh_interval: Duration,
    epoch: Instant,
    idle_supported: bool,
    next_id: u64,
    pending: Option<(PendingKind, u64, Instant)>,
}

impl RealtimeHost {
    /// `refresh_hz` is the display refresh rate frame-synced callbacks align
    /// to.
    pub fn new(refresh_hz: f64) -> Self {
        Self {
            refresh_interval: Duration::from_secs_f64(1.0 / refresh_hz.max(1.0)),
            epoch: Instant::now(),
            idle_supported: true,
            next_id: 1,
            pending: None,
        }
    }

    /// Disables idle callbacks, forcing the idle strategy's documented
    /// fallback to frame-synced.
    pub fn without_idle(mut self) -> Self {
        self.idle_supported = false;
        self
    }

    /// Blocks until the queued callback is due and consumes it. Returns
    /// false when nothing is queued (the pipeline was stopped).
    pub fn wait(&mut self) -> bool {
        let Some((_, _, deadline)) = self.pending.take() else {
            return false;
        };
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        true
    }

    /// The next display-refresh boundary after now.
    fn next_refresh(&self) -> Instant {
        let elapsed = self.epoch.elapsed().as_secs_f64();
        let interval = self.refresh_interval.as_secs_f64();
        let periods = (elapsed / interval).floor() + 1.0;
        self.epoch + Duration::from_secs_f64(periods * interval)
    }

    fn queue(&mut self, kind: PendingKind, deadline: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending = Some((kind, id, deadline));
        id
    }

    fn cancel(&mut self, kind: PendingKind, id: u64) {
        if let Some((pending_kind, pending_id, _)) = self.pending {
            if pending_kind == kind && pending_id == id {
                self.pending = None;
            }
        }
    }
}

impl TickHost for RealtimeHost {
    fn schedule_frame(&mut self) -> u64 {
        let deadline = self.next_refresh();
        self.queue(PendingKind::Frame, deadline)
    }

    fn schedule_idle(&mut self) -> Option<u64> {
        if !self.idle_supported {
            return None;
        }
        // Idle work lands after the next refresh, yielding the slot to
        // higher-priority callbacks.
        let deadline = self.next_refresh() + self.refresh_interval / 2;
        Some(self.queue(PendingKind::Idle, deadline))
    }

    fn schedule_timer(&mut self, delay: Duration) -> u64 {
        let deadline = Instant::now() + delay;
        self.queue(PendingKind::Timer, deadline)
    }

    fn cancel_frame(&mut self, id: u64) {
        self.cancel(PendingKind::Frame, id);
    }

    fn cancel_idle(&mut self, id: u64) {
        self.cancel(PendingKind::Idle, id);
    }

    fn cancel_timer(&mut self, id: u64) {
        self.cancel(PendingKind::Timer, id);
    }
}

/// Deterministic host for tests and headless embedding: callbacks are queued
/// instantly and fired by hand with [`ManualHost::fire`], with counters
/// recording how each mechanism was used.
pub struct ManualHost {
    pub idle_supported: bool,
    pub frame_schedules: u32,
    pub idle_schedules: u32,
    pub timer_schedules: u32,
    pub frame_cancels: u32,
    pub idle_cancels: u32,
    pub timer_cancels: u32,
    pub last_timer_delay: Option<Duration>,
    next_id: u64,
    pending: Option<(PendingKind, u64)>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self {
            idle_supported: true,
            frame_schedules: 0,
            idle_schedules: 0,
            timer_schedules: 0,
            frame_cancels: 0,
            idle_cancels: 0,
            timer_cancels: 0,
            last_timer_delay: None,
            next_id: 1,
            pending: None,
        }
    }

    /// Consumes the queued callback. Returns false when nothing is pending.
    pub fn fire(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn queue(&mut self, kind: PendingKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending = Some((kind, id));
        id
    }

    fn cancel(&mut self, kind: PendingKind, id: u64) {
        if self.pending == Some((kind, id)) {
            self.pending = None;
        }
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TickHost for ManualHost {
    fn schedule_frame(&mut self) -> u64 {
        self.frame_schedules += 1;
        self.queue(PendingKind::Frame)
    }

    fn schedule_idle(&mut self) -> Option<u64> {
        if !self.idle_supported {
            return None;
        }
        self.idle_schedules += 1;
        Some(self.queue(PendingKind::Idle))
    }

    fn schedule_timer(&mut self, delay: Duration) -> u64 {
        self.timer_schedules += 1;
        self.last_timer_delay = Some(delay);
        self.queue(PendingKind::Timer)
    }

    fn cancel_frame(&mut self, id: u64) {
        self.frame_cancels += 1;
        self.cancel(PendingKind::Frame, id);
    }

    fn cancel_idle(&mut self, id: u64) {
        self.idle_cancels += 1;
        self.cancel(PendingKind::Idle, id);
    }

    fn cancel_timer(&mut self, id: u64) {
        self.timer_cancels += 1;
        self.cancel(PendingKind::Timer, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_host_cancel_requires_matching_kind() {
        let mut host = RealtimeHost::new(60.0);
        let id = host.schedule_timer(Duration::from_millis(1));

        // A mismatched mechanism does not cancel the pending callback.
        host.cancel_frame(id);
        assert!(host.wait());

        let id = host.schedule_timer(Duration::from_millis(1));
        host.cancel_timer(id);
        assert!(!host.wait());
    }

    #[test]
    fn test_realtime_host_without_idle() {
        let mut host = RealtimeHost::new(60.0).without_idle();
        assert!(host.schedule_idle().is_none());
    }
}
