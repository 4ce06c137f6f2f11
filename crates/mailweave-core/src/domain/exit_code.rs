//! Exit codes reported by engines and aggregated by every supervisor.
//!
//! A code is either *busy* (`-1`, not resolved yet) or resolved (`>= 0`).
//! Resolved codes combine by `max`, busy acts as the identity until it
//! resolves, so the same rule works at the folder, account and top level.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Not resolved yet. Never a terminal value.
    pub const BUSY: ExitCode = ExitCode(-1);
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// A task or a supervised child failed.
    pub const ERROR: ExitCode = ExitCode(10);
    /// Internal invariant violated (engine without exit code, no child resolved).
    pub const INTERNAL: ExitCode = ExitCode(99);

    /// Negative values all mean "busy".
    pub const fn new(code: i32) -> Self {
        if code < 0 { Self::BUSY } else { Self(code) }
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_resolved(self) -> bool {
        self.0 >= 0
    }

    /// Combine two outcomes: the worst resolved one wins.
    pub fn aggregate(self, other: ExitCode) -> ExitCode {
        match (self.is_resolved(), other.is_resolved()) {
            (true, true) => Self(self.0.max(other.0)),
            (true, false) => self,
            (false, true) => other,
            (false, false) => Self::BUSY,
        }
    }

    /// Monotonic latch: raise `self` to `other` if `other` is worse.
    pub fn raise(&mut self, other: ExitCode) {
        *self = self.aggregate(other);
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        Self::BUSY
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromIterator<ExitCode> for ExitCode {
    fn from_iter<I: IntoIterator<Item = ExitCode>>(iter: I) -> Self {
        iter.into_iter().fold(Self::BUSY, ExitCode::aggregate)
    }
}
