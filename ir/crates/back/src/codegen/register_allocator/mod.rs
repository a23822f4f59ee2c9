pub use hint::{
    find_first_register_hint,
    find_hint_at_definition,
};
pub use interval::{
    EnvUsePosition,
    IntervalId,
    Intervals,
    LifetimePosition,
    LiveInterval,
    LiveRange,
    SafepointPosition,
    UsePosition,
};
pub use liveness::{
    LivenessState,
    SsaLivenessAnalysis,
};
pub use verify::{
    LivenessError,
    LivenessVerifier,
};

mod hint;
mod interval;
mod liveness;
mod verify;

/// Knobs of [`SsaLivenessAnalysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Run [`LivenessVerifier`] once the analysis converged and panic on any error.
    pub check_invariants: bool,
    /// Log every interval at `debug` level once the analysis converged.
    pub dump_intervals: bool,
}

impl LivenessConfig {
    /// Invariants are checked in debug builds only.
    pub const fn new() -> Self {
        Self {
            check_invariants: cfg!(debug_assertions),
            dump_intervals: false,
        }
    }

    /// Invariants are always checked. Intervals are not dumped.
    pub const fn checked() -> Self {
        Self {
            check_invariants: true,
            dump_intervals: false,
        }
    }

    pub const fn unchecked() -> Self {
        Self {
            check_invariants: false,
            dump_intervals: false,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::new()
    }
}
