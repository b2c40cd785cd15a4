//! Engine - realtime and offline execution loops
//!
//! The engine ties the executor and scheduler together.
//! - Realtime: the clock follows wall time; the loop sleeps with spin_sleep
//!   until the next timer is due.
//! - Offline: the clock only moves when stepped, so tests can drive timing
//!   objects through simulated time deterministically.

use crate::executor::Executor;
use crate::handle::Handle;
use crate::scheduler::TimeScheduler;
use spin_sleep::SpinSleeper;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tracing::warn;

pub use crate::scheduler::SchedulerMode;

/// Upper bound on timeslices processed by one offline advance.
const MAX_TIMESLICES: usize = 200_000;

/// Configuration for creating an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Time dilation (realtime only): logical seconds per wall second.
    pub rate: f64,
    /// Clock reading at engine creation, in seconds.
    pub start_time: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            start_time: 0.0,
        }
    }
}

pub struct Engine {
    executor: Rc<Executor>,
    scheduler: Rc<RefCell<TimeScheduler>>,
    sleeper: SpinSleeper,
}

impl Engine {
    pub fn new(mode: SchedulerMode, config: EngineConfig) -> Self {
        let scheduler = Rc::new(RefCell::new(TimeScheduler::with_start_time(
            mode,
            config.start_time,
        )));
        if mode == SchedulerMode::Realtime {
            scheduler.borrow_mut().set_rate(config.rate);
        }

        Self {
            executor: Rc::new(Executor::new()),
            scheduler,
            sleeper: SpinSleeper::default(),
        }
    }

    /// Offline engine whose clock starts at `start_time`.
    pub fn offline(start_time: f64) -> Self {
        Self::new(
            SchedulerMode::Offline,
            EngineConfig {
                start_time,
                ..Default::default()
            },
        )
    }

    pub fn handle(&self) -> Handle {
        Handle::new(self.executor.clone(), self.scheduler.clone())
    }

    pub fn now(&self) -> f64 {
        self.scheduler.borrow().now()
    }

    pub fn mode(&self) -> SchedulerMode {
        self.scheduler.borrow().mode
    }

    /// Run deferred work that is ready now, without moving the clock.
    pub fn run_until_stalled(&self) -> usize {
        self.executor.run_until_stalled()
    }

    /// Drive the engine until `is_done` returns true.
    ///
    /// Realtime engines sleep until the next timer is due. Offline engines
    /// jump straight to it, and return early once nothing is left to run.
    pub fn run_until<F>(&mut self, is_done: F)
    where
        F: Fn() -> bool,
    {
        loop {
            self.executor.run_until_stalled();
            if is_done() {
                break;
            }

            let next = self.scheduler.borrow_mut().peek_next_event_time();
            let Some(next_t) = next else {
                if self.mode() == SchedulerMode::Offline {
                    break;
                }
                self.sleeper.sleep(Duration::from_millis(1));
                continue;
            };

            let now = self.now();
            if next_t <= now || self.mode() == SchedulerMode::Offline {
                let mut sched = self.scheduler.borrow_mut();
                sched.set_offline_now(next_t);
                sched.process_one_timeslice();
                continue;
            }

            let rate = self.scheduler.borrow().rate();
            let dt_wall = ((next_t - now) / rate).max(0.0);
            // Wake periodically so `is_done` is re-checked even with far timers.
            self.sleeper
                .sleep(Duration::from_secs_f64(dt_wall.min(0.01)));
        }
    }

    /// Drive the engine until `fut` completes and return its output.
    ///
    /// Returns `None` if an offline engine runs out of work first.
    pub fn block_on<T: 'static>(&mut self, fut: impl Future<Output = T> + 'static) -> Option<T> {
        let slot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        self.executor.spawn(async move {
            *out.borrow_mut() = Some(fut.await);
        });

        let done = slot.clone();
        self.run_until(move || done.borrow().is_some());
        let result = slot.borrow_mut().take();
        result
    }

    /// Run for `secs` seconds of engine time.
    pub fn run_for(&mut self, secs: f64) {
        let target = self.now() + secs.max(0.0);
        match self.mode() {
            SchedulerMode::Offline => self.advance_to(target),
            SchedulerMode::Realtime => {
                let scheduler = self.scheduler.clone();
                self.run_until(move || scheduler.borrow().now() >= target);
            }
        }
    }

    /// Advance offline time to `target`, resolving every timer due on the way
    /// and draining the executor between timeslices.
    pub fn advance_to(&mut self, target: f64) {
        self.executor.run_until_stalled();

        let mut processed = 0;
        loop {
            let next = self.scheduler.borrow_mut().peek_next_event_time();
            let Some(next_t) = next.filter(|t| *t <= target) else {
                break;
            };

            {
                let mut sched = self.scheduler.borrow_mut();
                sched.set_offline_now(next_t);
                sched.process_one_timeslice();
            }
            self.executor.run_until_stalled();

            processed += 1;
            if processed > MAX_TIMESLICES {
                warn!(target, "advance_to exceeded {MAX_TIMESLICES} timeslices; stopping early");
                break;
            }
        }

        self.scheduler.borrow_mut().set_offline_now(target);
        self.executor.run_until_stalled();
    }

    /// Step offline time forward by `dt` seconds.
    pub fn step_sec(&mut self, dt: f64) {
        let s = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let target = self.now() + s;
        self.advance_to(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_offline_sleep_sequence() {
        let mut engine = Engine::offline(0.0);
        let handle = engine.handle();
        let counter = Rc::new(Cell::new(0));

        let (c, h) = (counter.clone(), handle.clone());
        handle.spawn(async move {
            c.set(c.get() + 1);
            let _ = h.sleep(0.1).await;
            c.set(c.get() + 1);
            let _ = h.sleep(0.1).await;
            c.set(c.get() + 1);
        });

        assert_eq!(counter.get(), 0);
        engine.step_sec(0.0);
        assert_eq!(counter.get(), 1);
        engine.step_sec(0.1);
        assert_eq!(counter.get(), 2);
        engine.step_sec(0.1);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn test_offline_start_time() {
        let mut engine = Engine::offline(10.0);
        assert_eq!(engine.now(), 10.0);
        engine.step_sec(2.5);
        assert_eq!(engine.now(), 12.5);
    }

    #[test]
    fn test_offline_run_until_jumps_to_timers() {
        let mut engine = Engine::offline(0.0);
        let handle = engine.handle();
        let done = Rc::new(Cell::new(false));

        let (d, h) = (done.clone(), handle.clone());
        handle.spawn(async move {
            let _ = h.sleep(5.0).await;
            d.set(true);
        });

        let d = done.clone();
        engine.run_until(move || d.get());
        assert!(done.get());
        assert_eq!(engine.now(), 5.0);
    }

    #[test]
    fn test_offline_run_until_returns_when_idle() {
        let mut engine = Engine::offline(0.0);
        engine.run_until(|| false);
        assert_eq!(engine.now(), 0.0);
    }

    #[test]
    fn test_block_on_returns_output() {
        let mut engine = Engine::offline(0.0);
        let handle = engine.handle();

        let h = handle.clone();
        let out = engine.block_on(async move {
            let _ = h.sleep(2.0).await;
            h.now()
        });
        assert_eq!(out, Some(2.0));
    }

    #[test]
    fn test_block_on_stalled_offline() {
        let mut engine = Engine::offline(0.0);
        let out = engine.block_on(std::future::pending::<()>());
        assert_eq!(out, None);
    }

    #[test]
    fn test_realtime_run_for() {
        let mut engine = Engine::new(
            SchedulerMode::Realtime,
            EngineConfig {
                rate: 100.0,
                ..Default::default()
            },
        );
        let handle = engine.handle();
        let fired = Rc::new(Cell::new(false));

        let f = fired.clone();
        handle.set_timeout_at(0.5, move || f.set(true));
        engine.run_for(1.0);

        assert!(fired.get());
        assert!(engine.now() >= 1.0);
    }
}
