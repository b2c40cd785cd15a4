//! Time Scheduler
//!
//! Owns the clock and the queue of pending timer waits. In realtime mode the
//! clock follows `Instant` (optionally dilated by a rate); in offline mode it
//! only moves when the engine advances it, which makes simulated time fully
//! deterministic.

use crate::pq::MinPq;
use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;
use std::time::Instant;

/// Scheduler execution mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerMode {
    Realtime,
    Offline,
}

/// Identifier of a pending timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Completion state shared between a timer future and the scheduler.
#[derive(Clone, Default)]
pub struct WaitState {
    inner: Rc<RefCell<WaitStateInner>>,
}

#[derive(Default)]
struct WaitStateInner {
    done: bool,
    cancelled: bool,
    waker: Option<Waker>,
}

impl WaitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_waker(&self, w: &Waker) {
        self.inner.borrow_mut().waker = Some(w.clone());
    }

    pub fn complete_ok(&self) {
        self.complete(false);
    }

    pub fn complete_cancelled(&self) {
        self.complete(true);
    }

    fn complete(&self, cancelled: bool) {
        let waker = {
            let mut s = self.inner.borrow_mut();
            if s.done || s.cancelled {
                return;
            }
            if cancelled {
                s.cancelled = true;
            } else {
                s.done = true;
            }
            s.waker.take()
        };
        if let Some(w) = waker {
            w.wake();
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.borrow().done
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }
}

/// A registered timer wait.
#[derive(Clone)]
pub struct TimeWaitMeta {
    pub seq: u64,
    pub target_time: f64,
    pub state: WaitState,
}

/// The clock plus the pending timer queue.
pub struct TimeScheduler {
    pub mode: SchedulerMode,

    /// Deterministic sequence counter, also used for timer ids.
    seq: u64,

    /// Time dilation anchors (realtime only).
    rate: f64,
    wall_anchor: Instant,
    logical_anchor: f64,

    /// Offline clock.
    offline_now: f64,

    time_pq: MinPq<TimeWaitMeta>,
}

impl TimeScheduler {
    pub fn new(mode: SchedulerMode) -> Self {
        Self::with_start_time(mode, 0.0)
    }

    /// Create a scheduler whose clock reads `start_time` at creation.
    pub fn with_start_time(mode: SchedulerMode, start_time: f64) -> Self {
        let start = if start_time.is_finite() { start_time } else { 0.0 };
        Self {
            mode,
            seq: 0,
            rate: 1.0,
            wall_anchor: Instant::now(),
            logical_anchor: start,
            offline_now: start,
            time_pq: MinPq::new(),
        }
    }

    pub fn alloc_seq(&mut self) -> u64 {
        let s = self.seq;
        self.seq += 1;
        s
    }

    /// Current clock reading in seconds.
    pub fn now(&self) -> f64 {
        match self.mode {
            SchedulerMode::Offline => self.offline_now,
            SchedulerMode::Realtime => {
                let dt = self.wall_anchor.elapsed().as_secs_f64();
                self.logical_anchor + dt * self.rate
            }
        }
    }

    /// Move the offline clock. Never moves backwards; ignored in realtime.
    pub fn set_offline_now(&mut self, t: f64) {
        if self.mode == SchedulerMode::Offline && t > self.offline_now {
            self.offline_now = t;
        }
    }

    /// Set the time dilation rate (realtime only).
    pub fn set_rate(&mut self, rate: f64) {
        if self.mode == SchedulerMode::Offline {
            return;
        }
        let r = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        self.logical_anchor = self.now();
        self.wall_anchor = Instant::now();
        self.rate = r;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn peek_next_event_time(&mut self) -> Option<f64> {
        self.time_pq.peek_deadline()
    }

    /// Register a wait resolving at `target_time`.
    pub fn add_time_wait(&mut self, target_time: f64, state: WaitState) -> TimerId {
        let seq = self.alloc_seq();
        let meta = TimeWaitMeta {
            seq,
            target_time,
            state,
        };
        self.time_pq.add(seq, target_time, seq, meta);
        TimerId(seq)
    }

    /// Cancel a pending wait and wake it as cancelled. Unknown ids are ignored.
    pub fn cancel_waiter(&mut self, id: TimerId) -> bool {
        match self.time_pq.remove(id.0) {
            Some(meta) => {
                meta.state.complete_cancelled();
                true
            }
            None => false,
        }
    }

    /// Resolve every wait whose deadline equals the earliest pending deadline,
    /// in registration order. Returns the resolved ids.
    pub fn process_one_timeslice(&mut self) -> Vec<TimerId> {
        let Some(t) = self.time_pq.peek_deadline() else {
            return Vec::new();
        };

        let mut batch: Vec<TimeWaitMeta> = Vec::new();
        while let Some(dl) = self.time_pq.peek_deadline() {
            if dl.to_bits() != t.to_bits() {
                break;
            }
            if let Some(entry) = self.time_pq.pop() {
                batch.push(entry.meta);
            }
        }
        batch.sort_by_key(|m| m.seq);

        batch
            .into_iter()
            .map(|w| {
                w.state.complete_ok();
                TimerId(w.seq)
            })
            .collect()
    }

    pub fn has_pending_waits(&self) -> bool {
        !self.time_pq.is_empty()
    }

    pub fn pending_waits(&self) -> usize {
        self.time_pq.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_creation() {
        let sched = TimeScheduler::new(SchedulerMode::Offline);
        assert_eq!(sched.mode, SchedulerMode::Offline);
        assert_eq!(sched.now(), 0.0);
    }

    #[test]
    fn test_start_time() {
        let sched = TimeScheduler::with_start_time(SchedulerMode::Offline, 10.0);
        assert_eq!(sched.now(), 10.0);
    }

    #[test]
    fn test_offline_clock_is_monotonic() {
        let mut sched = TimeScheduler::new(SchedulerMode::Offline);
        sched.set_offline_now(2.0);
        sched.set_offline_now(1.0);
        assert_eq!(sched.now(), 2.0);
    }

    #[test]
    fn test_realtime_clock_advances() {
        let mut sched = TimeScheduler::with_start_time(SchedulerMode::Realtime, 5.0);
        sched.set_rate(1000.0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(sched.now() > 5.0);
    }

    #[test]
    fn test_timeslice_resolves_same_deadline_in_seq_order() {
        let mut sched = TimeScheduler::new(SchedulerMode::Offline);
        let (s1, s2, s3) = (WaitState::new(), WaitState::new(), WaitState::new());
        let a = sched.add_time_wait(1.0, s1.clone());
        let b = sched.add_time_wait(0.5, s2.clone());
        let c = sched.add_time_wait(1.0, s3.clone());

        assert_eq!(sched.peek_next_event_time(), Some(0.5));
        assert_eq!(sched.process_one_timeslice(), vec![b]);
        assert!(s2.is_done());
        assert_eq!(sched.process_one_timeslice(), vec![a, c]);
        assert!(s1.is_done() && s3.is_done());
        assert!(!sched.has_pending_waits());
    }

    #[test]
    fn test_cancel_waiter() {
        let mut sched = TimeScheduler::new(SchedulerMode::Offline);
        let state = WaitState::new();
        let id = sched.add_time_wait(1.0, state.clone());

        assert!(sched.cancel_waiter(id));
        assert!(state.is_cancelled());
        assert!(!sched.cancel_waiter(id));
        assert_eq!(sched.peek_next_event_time(), None);
    }
}
