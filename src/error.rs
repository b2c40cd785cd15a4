//! Error types for timing objects.

use crate::ready_state::ReadyState;
use crate::vector::Vector;
use thiserror::Error;

/// Result type for timing object operations.
pub type TimingResult<T> = Result<T, TimingError>;

/// Errors returned by `query()` and `update()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    /// The object is not open.
    #[error("invalid state: timing object is {state}, expected open")]
    InvalidState {
        /// Ready state at the time of the call.
        state: ReadyState,
    },

    /// The merged vector would sit outside the interval or point out of it.
    #[error(
        "illegal value: position {} with velocity {} and acceleration {} is not admissible in [{start}, {end}]",
        .vector.position,
        .vector.velocity,
        .vector.acceleration
    )]
    IllegalValue {
        /// The rejected candidate.
        vector: Vector,
        /// Lower bound of the interval.
        start: f64,
        /// Upper bound of the interval.
        end: f64,
    },

    /// The provider's update did not produce a pending result.
    #[error("type mismatch: the timing provider source failed to return a pending update")]
    TypeMismatch,

    /// The provider rejected an update on its own terms.
    #[error("timing provider error: {message}")]
    Provider {
        /// Message reported by the provider.
        message: String,
    },
}

impl TimingError {
    pub fn invalid_state(state: ReadyState) -> Self {
        Self::InvalidState { state }
    }
}
