//! Rust Timing Object
//!
//! A timing object models a position moving with constant acceleration over
//! a closed interval:
//! - Closed-form projection, so reads never drift
//! - Automatic clamping when the motion reaches a bound
//! - `change` / `readystatechange` / `error` events, always delivered later
//! - Freestanding operation or mirroring of an external timing provider
//!
//! Timing objects run on a small single-threaded engine with two execution
//! modes: realtime (wall clock, spin_sleep) and offline (explicit stepping).

pub mod error;
pub mod vector;
pub mod solver;
pub mod ready_state;
pub mod event;
pub mod pq;
pub mod executor;
pub mod scheduler;
pub mod handle;
pub mod engine;
pub mod provider;
pub mod timing_object;


pub use engine::{Engine, EngineConfig, SchedulerMode};
pub use error::{TimingError, TimingResult};
pub use event::{Event, EventTarget, Handler, Listener};
pub use handle::{Handle, WaitError};
pub use provider::{ManualProvider, ProviderEventKind, TimingProvider, UpdateFuture, UpdatePolicy};
pub use ready_state::ReadyState;
pub use timing_object::{TimingEvent, TimingEventKind, TimingObject};
pub use vector::{Vector, VectorUpdate};
