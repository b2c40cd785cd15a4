//! Timing provider sources
//!
//! A provider is the authority a timing object can mirror: typically a clock
//! shared with remote peers. The object reads the provider's bounds, skew,
//! ready state and vector, forwards `update()` calls to it, and follows its
//! `adjust`, `change` and `readystatechange` events.

use crate::error::{TimingError, TimingResult};
use crate::event::{Event, EventTarget};
use crate::handle::Handle;
use crate::ready_state::ReadyState;
use crate::vector::{Vector, VectorUpdate};
use std::cell::RefCell;
use std::future::{self, Future};
use std::pin::Pin;
use tracing::trace;

/// Pending outcome of an `update()` call.
pub type UpdateFuture = Pin<Box<dyn Future<Output = TimingResult<()>>>>;

/// An update future that has already settled.
pub fn settled(result: TimingResult<()>) -> UpdateFuture {
    Box::pin(future::ready(result))
}

/// Events emitted by a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    /// The skew changed.
    Adjust,
    /// The vector changed.
    Change,
    /// The ready state changed.
    ReadyStateChange,
}

/// Contract a timing object relies on when mirroring a provider.
pub trait TimingProvider {
    fn start_position(&self) -> f64;

    fn end_position(&self) -> f64;

    /// Offset to add to the local clock to obtain provider time.
    fn skew(&self) -> f64;

    fn ready_state(&self) -> ReadyState;

    /// Current vector; its timestamp is in provider time.
    fn vector(&self) -> Vector;

    fn error(&self) -> Option<String>;

    /// Ask the provider to apply `update`. `None` means the provider failed
    /// to produce a pending result.
    fn update(&self, update: VectorUpdate) -> Option<UpdateFuture>;

    fn events(&self) -> &EventTarget<ProviderEventKind>;
}

/// How a [`ManualProvider`] answers `update()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum UpdatePolicy {
    /// Merge the update into the vector and emit `change`.
    #[default]
    Apply,
    /// Record the request and resolve without changing anything.
    Record,
    /// Resolve with a provider error carrying this message.
    Reject(String),
    /// Produce no pending result at all.
    Refuse,
}

struct ManualState {
    start_position: f64,
    end_position: f64,
    skew: f64,
    ready_state: ReadyState,
    vector: Vector,
    error: Option<String>,
    policy: UpdatePolicy,
    requested: Vec<VectorUpdate>,
}

/// Provider driven by explicit calls.
///
/// Useful as a bridge for a clock synchronized by some external transport
/// (feed it `set_vector`/`set_skew`/`set_ready_state` as messages arrive), and
/// as a stand-in provider in tests. Events are dispatched synchronously from
/// the setters.
pub struct ManualProvider {
    state: RefCell<ManualState>,
    events: EventTarget<ProviderEventKind>,
    clock: Option<Handle>,
}

impl Default for ManualProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualProvider {
    /// An open provider at rest at position 0 with unbounded interval.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(ManualState {
                start_position: f64::NEG_INFINITY,
                end_position: f64::INFINITY,
                skew: 0.0,
                ready_state: ReadyState::Open,
                vector: Vector::stationary(0.0, 0.0),
                error: None,
                policy: UpdatePolicy::Apply,
                requested: Vec::new(),
            }),
            events: EventTarget::new(),
            clock: None,
        }
    }

    /// Use `handle`'s clock to project the vector when applying updates.
    pub fn with_clock(mut self, handle: Handle) -> Self {
        self.clock = Some(handle);
        self
    }

    pub fn with_vector(self, vector: Vector) -> Self {
        self.state.borrow_mut().vector = vector;
        self
    }

    pub fn with_bounds(self, start_position: f64, end_position: f64) -> Self {
        {
            let mut s = self.state.borrow_mut();
            s.start_position = start_position;
            s.end_position = end_position;
        }
        self
    }

    pub fn with_ready_state(self, ready_state: ReadyState) -> Self {
        self.state.borrow_mut().ready_state = ready_state;
        self
    }

    pub fn with_skew(self, skew: f64) -> Self {
        self.state.borrow_mut().skew = skew;
        self
    }

    pub fn with_update_policy(self, policy: UpdatePolicy) -> Self {
        self.state.borrow_mut().policy = policy;
        self
    }

    fn now(&self) -> f64 {
        self.clock.as_ref().map_or(0.0, Handle::now)
    }

    fn emit(&self, kind: ProviderEventKind) {
        trace!(?kind, "provider event");
        self.events.dispatch(&Event::new(kind, self.now()));
    }

    /// Replace the vector and emit `change`.
    pub fn set_vector(&self, vector: Vector) {
        self.state.borrow_mut().vector = vector;
        self.emit(ProviderEventKind::Change);
    }

    /// Replace the skew and emit `adjust`.
    pub fn set_skew(&self, skew: f64) {
        self.state.borrow_mut().skew = skew;
        self.emit(ProviderEventKind::Adjust);
    }

    /// Replace the ready state and emit `readystatechange`.
    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.borrow_mut().ready_state = ready_state;
        self.emit(ProviderEventKind::ReadyStateChange);
    }

    /// Set or clear the reported error. No event is emitted.
    pub fn set_error(&self, error: Option<String>) {
        self.state.borrow_mut().error = error;
    }

    pub fn set_update_policy(&self, policy: UpdatePolicy) {
        self.state.borrow_mut().policy = policy;
    }

    /// Every update requested so far, in call order.
    pub fn requested_updates(&self) -> Vec<VectorUpdate> {
        self.state.borrow().requested.clone()
    }
}

impl TimingProvider for ManualProvider {
    fn start_position(&self) -> f64 {
        self.state.borrow().start_position
    }

    fn end_position(&self) -> f64 {
        self.state.borrow().end_position
    }

    fn skew(&self) -> f64 {
        self.state.borrow().skew
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready_state
    }

    fn vector(&self) -> Vector {
        self.state.borrow().vector
    }

    fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    fn update(&self, update: VectorUpdate) -> Option<UpdateFuture> {
        let policy = {
            let mut s = self.state.borrow_mut();
            s.requested.push(update);
            s.policy.clone()
        };

        match policy {
            UpdatePolicy::Refuse => None,
            UpdatePolicy::Record => Some(settled(Ok(()))),
            UpdatePolicy::Reject(message) => Some(settled(Err(TimingError::Provider { message }))),
            UpdatePolicy::Apply => {
                if !update.is_empty() {
                    let current = self.vector();
                    let base = match &self.clock {
                        Some(clock) => current.project(clock.now() + self.skew() - current.timestamp),
                        None => current,
                    };
                    self.set_vector(base.with_update(&update));
                }
                Some(settled(Ok(())))
            }
        }
    }

    fn events(&self) -> &EventTarget<ProviderEventKind> {
        &self.events
    }
}
