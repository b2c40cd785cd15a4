//! Timing Object
//!
//! A boundary-clamped kinematic state (position, velocity, acceleration) that
//! moves with the runtime clock. Reads go through `query()`, writes through
//! `update()`. A timing object is either freestanding, in which case it is its
//! own authority, or mirrors a [`TimingProvider`].
//!
//! All work triggered by a call (event dispatch, boundary timers) is handed to
//! the runtime and runs later, so listeners attached right after a call still
//! see its events. Deferred work holds the object weakly.

use crate::error::{TimingError, TimingResult};
use crate::event::{Event, EventTarget, Handler, HandlerProperty, Listener};
use crate::handle::Handle;
use crate::provider::{settled, ProviderEventKind, TimingProvider, UpdateFuture};
use crate::ready_state::ReadyState;
use crate::scheduler::TimerId;
use crate::solver::{next_boundary_crossing, Bound, Crossing};
use crate::vector::{Vector, VectorUpdate};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Events emitted by a timing object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimingEventKind {
    Change,
    Error,
    ReadyStateChange,
}

impl TimingEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimingEventKind::Change => "change",
            TimingEventKind::Error => "error",
            TimingEventKind::ReadyStateChange => "readystatechange",
        }
    }
}

pub type TimingEvent = Event<TimingEventKind>;

/// Armed timer for the next boundary crossing.
struct BoundaryTimer {
    id: TimerId,
    /// Crossing time, in vector time.
    at: f64,
    /// Position of the bound that will be crossed.
    position: f64,
    fired: bool,
}

struct State {
    vector: Vector,
    start_position: f64,
    end_position: f64,
    ready_state: ReadyState,
    skew: f64,
    /// Bumped on every vector replacement; timer callbacks compare against it.
    generation: u64,
    boundary: Option<BoundaryTimer>,
    provider: Option<Rc<dyn TimingProvider>>,
    subscriptions: Vec<(ProviderEventKind, Listener<ProviderEventKind>)>,
}

struct Shared {
    handle: Handle,
    events: EventTarget<TimingEventKind>,
    onchange: HandlerProperty<TimingEventKind>,
    onerror: HandlerProperty<TimingEventKind>,
    onreadystatechange: HandlerProperty<TimingEventKind>,
    state: RefCell<State>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(timer) = state.boundary.take() {
            self.handle.try_clear_timeout(timer.id);
        }
        if let Some(provider) = &state.provider {
            for (kind, listener) in state.subscriptions.drain(..) {
                provider.events().remove_listener(kind, Some(&listener));
            }
        }
    }
}

/// Handle to a timing object. Clones share the same object.
#[derive(Clone)]
pub struct TimingObject {
    shared: Rc<Shared>,
}

impl fmt::Debug for TimingObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.state.borrow();
        f.debug_struct("TimingObject")
            .field("vector", &s.vector)
            .field("start_position", &s.start_position)
            .field("end_position", &s.end_position)
            .field("ready_state", &s.ready_state)
            .field("skew", &s.skew)
            .field("provider", &s.provider.is_some())
            .finish()
    }
}

impl TimingObject {
    /// Freestanding object with an unbounded interval.
    pub fn new(handle: &Handle, update: VectorUpdate) -> Self {
        Self::with_bounds(handle, update, f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Freestanding object confined to `[start_position, end_position]`.
    ///
    /// Unset fields of `update` default to zero and the vector is stamped with
    /// the current clock reading. A position outside the interval is snapped
    /// to the nearest bound at rest.
    pub fn with_bounds(
        handle: &Handle,
        update: VectorUpdate,
        start_position: f64,
        end_position: f64,
    ) -> Self {
        let now = handle.now();
        let mut vector = update.to_vector(now);
        if vector.position > end_position {
            vector = Vector::stationary(end_position, now);
        } else if vector.position < start_position {
            vector = Vector::stationary(start_position, now);
        }

        let object = Self::from_state(
            handle,
            State {
                vector,
                start_position,
                end_position,
                ready_state: ReadyState::Open,
                skew: 0.0,
                generation: 0,
                boundary: None,
                provider: None,
                subscriptions: Vec::new(),
            },
        );
        debug!(?vector, start_position, end_position, "timing object created");

        object.arm_boundary_timer();
        object.emit_later(TimingEventKind::ReadyStateChange);
        object
    }

    /// Object mirroring `provider`. Bounds, skew, ready state and vector are
    /// adopted as reported, without clamping.
    pub fn from_provider(handle: &Handle, provider: Rc<dyn TimingProvider>) -> Self {
        let vector = provider.vector();
        let object = Self::from_state(
            handle,
            State {
                vector,
                start_position: provider.start_position(),
                end_position: provider.end_position(),
                ready_state: provider.ready_state(),
                skew: provider.skew(),
                generation: 0,
                boundary: None,
                provider: Some(provider.clone()),
                subscriptions: Vec::new(),
            },
        );
        debug!(?vector, ready_state = %provider.ready_state(), "timing object attached to provider");

        object.arm_boundary_timer();
        object.subscribe(provider.as_ref());
        object
    }

    fn from_state(handle: &Handle, state: State) -> Self {
        Self {
            shared: Rc::new(Shared {
                handle: handle.clone(),
                events: EventTarget::new(),
                onchange: HandlerProperty::new(TimingEventKind::Change),
                onerror: HandlerProperty::new(TimingEventKind::Error),
                onreadystatechange: HandlerProperty::new(TimingEventKind::ReadyStateChange),
                state: RefCell::new(state),
            }),
        }
    }

    // --- Reads ---

    /// Current vector, projected to now.
    ///
    /// A vector that has run past a bound is first clamped to it (at rest),
    /// and the clamp is committed, so the result is never outside the interval.
    pub fn query(&self) -> TimingResult<Vector> {
        let (projected, clamp_to) = {
            let s = self.shared.state.borrow();
            if s.ready_state != ReadyState::Open {
                return Err(TimingError::invalid_state(s.ready_state));
            }

            let now = self.shared.handle.now() + s.skew;
            let projected = s.vector.project(now - s.vector.timestamp);

            let clamp_to = if projected.position > s.end_position {
                Some(s.end_position)
            } else if projected.position < s.start_position {
                Some(s.start_position)
            } else {
                // Rounding can leave the projection a hair short of a bound the
                // motion has already reached; clamp only if that motion would
                // carry it out of the interval.
                s.boundary
                    .as_ref()
                    .filter(|b| b.fired || now >= b.at)
                    .filter(|b| {
                        let at_bound = Vector { position: b.position, ..projected };
                        !at_bound.is_admissible(s.start_position, s.end_position)
                    })
                    .map(|b| b.position)
            };
            (projected, clamp_to)
        };

        match clamp_to {
            None => Ok(projected),
            Some(position) => {
                debug!(position, at = projected.timestamp, "clamping at boundary");
                self.commit_vector(Vector::stationary(position, projected.timestamp));
                self.query()
            }
        }
    }

    /// The stored vector, without projection.
    pub fn vector_snapshot(&self) -> Vector {
        self.shared.state.borrow().vector
    }

    pub fn start_position(&self) -> f64 {
        self.shared.state.borrow().start_position
    }

    pub fn end_position(&self) -> f64 {
        self.shared.state.borrow().end_position
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.borrow().ready_state
    }

    pub fn skew(&self) -> f64 {
        self.shared.state.borrow().skew
    }

    pub fn timing_provider_source(&self) -> Option<Rc<dyn TimingProvider>> {
        self.shared.state.borrow().provider.clone()
    }

    // --- Writes ---

    /// Change the motion.
    ///
    /// Provider-backed objects forward the update and return the provider's
    /// pending result. Freestanding objects merge the set fields onto the
    /// current vector and commit it before returning; the returned future
    /// only reports the outcome.
    pub fn update(&self, update: VectorUpdate) -> UpdateFuture {
        let (ready_state, provider) = {
            let s = self.shared.state.borrow();
            (s.ready_state, s.provider.clone())
        };
        if ready_state != ReadyState::Open {
            return settled(Err(TimingError::invalid_state(ready_state)));
        }

        if let Some(provider) = provider {
            trace!(?update, "forwarding update to provider");
            return provider
                .update(update)
                .unwrap_or_else(|| settled(Err(TimingError::TypeMismatch)));
        }

        if update.is_empty() {
            return settled(Ok(()));
        }

        let current = match self.query() {
            Ok(vector) => vector,
            Err(err) => return settled(Err(err)),
        };
        let candidate = current.with_update(&update);
        let (start, end) = (self.start_position(), self.end_position());
        if !candidate.is_admissible(start, end) {
            debug!(?candidate, start, end, "update rejected");
            return settled(Err(TimingError::IllegalValue {
                vector: candidate,
                start,
                end,
            }));
        }

        self.commit_vector(candidate);
        settled(Ok(()))
    }

    /// Release the timer and provider subscriptions, drop every listener and
    /// handler, and close the object. No event is emitted.
    pub fn dispose(&self) {
        let timer = {
            let mut s = self.shared.state.borrow_mut();
            s.ready_state = ReadyState::Closed;
            s.generation += 1;
            s.boundary.take()
        };
        if let Some(timer) = timer {
            self.shared.handle.clear_timeout(timer.id);
        }
        self.unsubscribe();

        let shared = &self.shared;
        shared.onchange.reset();
        shared.onerror.reset();
        shared.onreadystatechange.reset();
        shared.events.clear();
        debug!("timing object disposed");
    }

    // --- Events ---

    pub fn add_event_listener(&self, kind: TimingEventKind, listener: Listener<TimingEventKind>) {
        self.shared.events.add_listener(kind, listener);
    }

    /// Remove `listener`, or every listener of `kind` when `None`.
    pub fn remove_event_listener(
        &self,
        kind: TimingEventKind,
        listener: Option<&Listener<TimingEventKind>>,
    ) {
        self.shared.events.remove_listener(kind, listener);
    }

    /// Dispatch `event` to the listeners of its kind right away.
    ///
    /// Returns whether any listener ran. Events cannot be cancelled, so this
    /// is not the DOM's "not cancelled" flag, which would always be true.
    pub fn dispatch_event(&self, event: &TimingEvent) -> bool {
        self.shared.events.dispatch(event)
    }

    pub fn onchange(&self) -> Option<Handler<TimingEventKind>> {
        self.shared.onchange.get()
    }

    pub fn set_onchange(&self, handler: Option<Handler<TimingEventKind>>) {
        self.shared.onchange.set(&self.shared.events, handler);
    }

    pub fn onerror(&self) -> Option<Handler<TimingEventKind>> {
        self.shared.onerror.get()
    }

    pub fn set_onerror(&self, handler: Option<Handler<TimingEventKind>>) {
        self.shared.onerror.set(&self.shared.events, handler);
    }

    pub fn onreadystatechange(&self) -> Option<Handler<TimingEventKind>> {
        self.shared.onreadystatechange.get()
    }

    pub fn set_onreadystatechange(&self, handler: Option<Handler<TimingEventKind>>) {
        self.shared
            .onreadystatechange
            .set(&self.shared.events, handler);
    }

    // --- Internals ---

    /// Replace the vector, re-arm the boundary timer and announce the change.
    fn commit_vector(&self, vector: Vector) {
        {
            let mut s = self.shared.state.borrow_mut();
            s.vector = vector;
        }
        trace!(?vector, "vector committed");
        self.arm_boundary_timer();
        self.emit_later(TimingEventKind::Change);
    }

    /// Cancel the pending boundary timer and arm one for the stored vector.
    fn arm_boundary_timer(&self) {
        let vector = self.vector_snapshot();
        self.arm_boundary_timer_from(vector);
    }

    /// Cancel the pending boundary timer and arm one for the next crossing
    /// of `from`, which is in vector time.
    fn arm_boundary_timer_from(&self, from: Vector) {
        let (stale, start, end, skew, generation) = {
            let mut s = self.shared.state.borrow_mut();
            s.generation += 1;
            (
                s.boundary.take(),
                s.start_position,
                s.end_position,
                s.skew,
                s.generation,
            )
        };
        if let Some(stale) = stale {
            self.shared.handle.clear_timeout(stale.id);
        }

        if (start.is_infinite() && end.is_infinite()) || from.is_stationary() {
            return;
        }
        let Some(crossing) = upcoming_crossing(&from, start, end) else {
            return;
        };

        let at = from.timestamp + crossing.delay;
        let weak = Rc::downgrade(&self.shared);
        let id = self
            .shared
            .handle
            .set_timeout_at(at - skew, move || Self::on_boundary_timer(&weak, generation));
        trace!(at, bound = ?crossing.bound, "boundary timer armed");

        self.shared.state.borrow_mut().boundary = Some(BoundaryTimer {
            id,
            at,
            position: crossing.position,
            fired: false,
        });
    }

    fn on_boundary_timer(weak: &Weak<Shared>, generation: u64) {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        {
            let mut s = shared.state.borrow_mut();
            if s.generation != generation {
                return;
            }
            if let Some(boundary) = s.boundary.as_mut() {
                boundary.fired = true;
            }
        }

        let object = TimingObject { shared };
        match object.query() {
            // No clamp: the motion touched the bound and turns back inside.
            Ok(projected) if object.shared.state.borrow().generation == generation => {
                trace!(at = projected.timestamp, "bound touched without leaving");
                object.arm_boundary_timer_from(projected);
            }
            Ok(_) => {}
            Err(err) => trace!(%err, "boundary timer fired on a closed object"),
        }
    }

    /// Dispatch an event of `kind` on a later executor turn.
    fn emit_later(&self, kind: TimingEventKind) {
        let weak = Rc::downgrade(&self.shared);
        self.shared.handle.spawn(async move {
            if let Some(shared) = weak.upgrade() {
                let event = Event::new(kind, shared.handle.now());
                trace!(kind = kind.as_str(), "dispatching");
                shared.events.dispatch(&event);
            }
        });
    }

    // --- Provider relay ---

    fn subscribe(&self, provider: &dyn TimingProvider) {
        let kinds = [
            ProviderEventKind::Adjust,
            ProviderEventKind::Change,
            ProviderEventKind::ReadyStateChange,
        ];
        let subscriptions: Vec<_> = kinds
            .into_iter()
            .map(|kind| {
                let weak = Rc::downgrade(&self.shared);
                let listener: Listener<ProviderEventKind> =
                    Rc::new(move |_: &Event<ProviderEventKind>| {
                        if let Some(shared) = weak.upgrade() {
                            TimingObject { shared }.on_provider_event(kind);
                        }
                    });
                provider.events().add_listener(kind, listener.clone());
                (kind, listener)
            })
            .collect();

        self.shared.state.borrow_mut().subscriptions = subscriptions;
    }

    fn unsubscribe(&self) {
        let (provider, subscriptions) = {
            let mut s = self.shared.state.borrow_mut();
            (s.provider.clone(), std::mem::take(&mut s.subscriptions))
        };
        let Some(provider) = provider else {
            return;
        };
        for (kind, listener) in subscriptions {
            provider.events().remove_listener(kind, Some(&listener));
        }
    }

    fn on_provider_event(&self, kind: ProviderEventKind) {
        let Some(provider) = self.timing_provider_source() else {
            return;
        };

        match kind {
            ProviderEventKind::Adjust => {
                let skew = provider.skew();
                self.shared.state.borrow_mut().skew = skew;
                debug!(skew, "skew adjusted");
                // Crossing times are in provider time; move the local deadline.
                self.arm_boundary_timer();
            }
            ProviderEventKind::Change => {
                let vector = provider.vector();
                debug!(?vector, "provider vector changed");
                self.commit_vector(vector);
            }
            ProviderEventKind::ReadyStateChange => {
                let proposed = provider.ready_state();
                let current = self.ready_state();

                if current.can_transition_to(proposed) {
                    debug!(from = %current, to = %proposed, "ready state relayed");
                    self.shared.state.borrow_mut().ready_state = proposed;
                } else {
                    warn!(from = %current, to = %proposed, "invalid provider ready state transition; closing");
                    self.shared.state.borrow_mut().ready_state = ReadyState::Closed;
                    self.unsubscribe();
                }

                if let Some(message) = provider.error() {
                    warn!(%message, "provider reported an error");
                    self.emit_later(TimingEventKind::Error);
                }
                self.emit_later(TimingEventKind::ReadyStateChange);
            }
        }
    }
}

/// Next crossing of `vector` that lies strictly in its future.
///
/// A vector sitting on a bound can still report a vanishing delay to it; in
/// that case only the opposite bound is considered.
fn upcoming_crossing(vector: &Vector, start: f64, end: f64) -> Option<Crossing> {
    let ahead = |c: &Crossing| vector.timestamp + c.delay > vector.timestamp;
    let crossing = next_boundary_crossing(vector, start, end)?;
    if ahead(&crossing) {
        return Some(crossing);
    }
    let other = match crossing.bound {
        Bound::Start => next_boundary_crossing(vector, f64::NEG_INFINITY, end),
        Bound::End => next_boundary_crossing(vector, start, f64::INFINITY),
    };
    other.filter(ahead)
}
