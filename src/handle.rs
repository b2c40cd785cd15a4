//! Runtime handle
//!
//! A cheap, cloneable reference to an engine's executor and scheduler. Timing
//! objects hold one to read the clock, defer work and arm timers.

use crate::executor::Executor;
use crate::scheduler::{SchedulerMode, TimeScheduler, TimerId, WaitState};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use thiserror::Error;

/// Returned by a timer future whose timer was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timer {0:?} cancelled")]
pub struct WaitError(pub TimerId);

#[derive(Clone)]
pub struct Handle {
    executor: Rc<Executor>,
    scheduler: Rc<RefCell<TimeScheduler>>,
}

impl Handle {
    pub fn new(executor: Rc<Executor>, scheduler: Rc<RefCell<TimeScheduler>>) -> Self {
        Self {
            executor,
            scheduler,
        }
    }

    /// Current clock reading in seconds.
    pub fn now(&self) -> f64 {
        self.scheduler.borrow().now()
    }

    pub fn mode(&self) -> SchedulerMode {
        self.scheduler.borrow().mode
    }

    /// Run `fut` on the executor. It starts on the next drain, never inline.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.executor.spawn(fut);
    }

    /// Future resolving once the clock reaches `t`. The timer is armed
    /// immediately, not on first poll.
    pub fn sleep_until(&self, t: f64) -> TimerFuture {
        let state = WaitState::new();
        let id = self.scheduler.borrow_mut().add_time_wait(t, state.clone());
        TimerFuture { id, state }
    }

    /// Future resolving `secs` seconds from now. Negative or NaN durations are zero.
    pub fn sleep(&self, secs: f64) -> TimerFuture {
        let s = if secs.is_finite() && secs > 0.0 { secs } else { 0.0 };
        self.sleep_until(self.now() + s)
    }

    /// Call `f` once the clock reaches `t`, unless cleared first.
    pub fn set_timeout_at(&self, t: f64, f: impl FnOnce() + 'static) -> TimerId {
        let timer = self.sleep_until(t);
        let id = timer.id();
        self.spawn(async move {
            if timer.await.is_ok() {
                f();
            }
        });
        id
    }

    /// Cancel a timer. Returns false if it already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.scheduler.borrow_mut().cancel_waiter(id)
    }

    /// Like [`Handle::clear_timeout`], but gives up instead of panicking when
    /// the scheduler is busy. Used from `Drop`.
    pub(crate) fn try_clear_timeout(&self, id: TimerId) -> bool {
        match self.scheduler.try_borrow_mut() {
            Ok(mut sched) => sched.cancel_waiter(id),
            Err(_) => false,
        }
    }
}

/// Future for a scheduler timer.
pub struct TimerFuture {
    id: TimerId,
    state: WaitState,
}

impl TimerFuture {
    pub fn id(&self) -> TimerId {
        self.id
    }
}

impl Future for TimerFuture {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.state.is_cancelled() {
            return Poll::Ready(Err(WaitError(this.id)));
        }
        if this.state.is_done() {
            return Poll::Ready(Ok(()));
        }

        this.state.set_waker(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use std::cell::Cell;

    fn offline() -> Engine {
        Engine::new(SchedulerMode::Offline, EngineConfig::default())
    }

    #[test]
    fn test_spawn_is_deferred() {
        let mut engine = offline();
        let handle = engine.handle();
        let ran = Rc::new(Cell::new(false));

        let r = ran.clone();
        handle.spawn(async move { r.set(true) });
        assert!(!ran.get());

        engine.step_sec(0.0);
        assert!(ran.get());
    }

    #[test]
    fn test_set_timeout_fires_at_deadline() {
        let mut engine = offline();
        let handle = engine.handle();
        let fired_at = Rc::new(Cell::new(None));

        let (f, h) = (fired_at.clone(), handle.clone());
        handle.set_timeout_at(0.25, move || f.set(Some(h.now())));

        engine.step_sec(0.2);
        assert_eq!(fired_at.get(), None);
        engine.step_sec(0.1);
        assert_eq!(fired_at.get(), Some(0.25));
    }

    #[test]
    fn test_clear_timeout() {
        let mut engine = offline();
        let handle = engine.handle();
        let fired = Rc::new(Cell::new(false));

        let f = fired.clone();
        let id = handle.set_timeout_at(0.5, move || f.set(true));
        assert!(handle.clear_timeout(id));
        assert!(!handle.clear_timeout(id));

        engine.step_sec(1.0);
        assert!(!fired.get());
    }

    #[test]
    fn test_sleep_negative_is_zero() {
        let mut engine = offline();
        let handle = engine.handle();
        let done = Rc::new(Cell::new(false));

        let (d, h) = (done.clone(), handle.clone());
        handle.spawn(async move {
            let _ = h.sleep(-1.0).await;
            let _ = h.sleep(f64::NAN).await;
            d.set(true);
        });

        engine.step_sec(0.0);
        assert!(done.get());
    }
}
