//! Connection state of a timing object or provider.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Whether a mirrored provider may move from `self` to `next`.
    ///
    /// `connecting` may go anywhere, `open` only toward closing or closed,
    /// `closing` only to closed, and `closed` is terminal.
    pub fn can_transition_to(self, next: ReadyState) -> bool {
        match self {
            ReadyState::Connecting => true,
            ReadyState::Open => matches!(next, ReadyState::Closing | ReadyState::Closed),
            ReadyState::Closing => next == ReadyState::Closed,
            ReadyState::Closed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
