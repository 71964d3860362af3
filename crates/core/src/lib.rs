#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared data model for the permuter@home-style search driver: permuters,
//! seeds, tasks, feedback and the wire form of a permuter's configuration.
//!
//! This crate has no networking and no subprocess handling of its own; it is
//! the dependency-light core that both the coordinator and the evaluator
//! host build on, following the usual `client-core` split.

pub mod eval;
pub mod identity;
pub mod permuter;
pub mod seed;
pub mod subprocess;
pub mod task;
pub mod wire_data;

pub use eval::{CandidateResult, EvalError, EvalResult, ProfilerStats};
pub use permuter::{CandidateGenerator, CompilerHandle, Permuter, PermuterConfig, ScorerHandle};
pub use subprocess::{ShellCandidateGenerator, ShellCompiler, ShellScorer};
pub use seed::{cycle_seeds, SeedIterator, SeedTuple};
pub use task::{Feedback, Task};
pub use wire_data::PermuterData;

/// Score sentinel meaning "this candidate could not be scored".
///
/// Mirrors `Scorer.PENALTY_INF` upstream: scores are
/// otherwise nonnegative, so any sufficiently large constant works as a
/// sentinel. Chosen well below `i64::MAX` so that arithmetic on scores (e.g.
/// summing for display) cannot silently overflow.
pub const PENALTY_INF: i64 = 10_000_000_000;
