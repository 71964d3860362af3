//! Result types produced by evaluating a single `(permuter, seed)` work item.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::seed::SeedTuple;

/// Rolling per-stage timing breakdown for a single evaluation, used to feed
/// the coordinator's `--show-timings` accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilerStats {
    /// Wall time spent in each named stage (e.g. `"permute"`, `"compile"`, `"score"`).
    pub time_stats: BTreeMap<String, Duration>,
}

impl ProfilerStats {
    /// Record (accumulate) a duration for a named stage.
    pub fn add_stat(&mut self, stage: impl Into<String>, dt: Duration) {
        *self.time_stats.entry(stage.into()).or_default() += dt;
    }
}

/// A scored candidate: the result of permute -> compile -> score succeeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResult {
    /// Nonnegative distance from the target object, or [`crate::PENALTY_INF`].
    pub score: i64,
    /// Hash of the resulting object code, used to detect "different asm, same score".
    pub hash: String,
    /// Per-stage timing for this single evaluation.
    pub profiler: ProfilerStats,
    /// The generated C source, present only when this is an improvement/tie
    /// or the permuter was configured with `need_all_sources`.
    pub source: Option<String>,
}

/// An internal failure while generating, compiling, or scoring a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    /// Human-readable description of the failure (exception text, compiler
    /// crash output, etc).
    pub exc_str: String,
    /// The seed that produced the failure, for the reproduction message.
    pub seed: Option<SeedTuple>,
}

/// Either a scored candidate or an internal evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalResult {
    /// The permuter, compiler, or scorer raised internally.
    Error(EvalError),
    /// A candidate was produced and scored (possibly with the penalty score).
    Candidate(CandidateResult),
}

impl EvalResult {
    /// True iff this is a [`CandidateResult`] with `score == 0`.
    pub fn is_zero(&self) -> bool {
        matches!(self, EvalResult::Candidate(c) if c.score == 0)
    }
}
