//! `Task` (coordinator -> worker) and `Feedback` (worker -> coordinator).

use crate::eval::EvalResult;
use crate::seed::SeedTuple;

/// A unit of work flowing from the coordinator to a worker (local thread or
/// remote session writer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Evaluate `seed` against the permuter at `permuter_index`.
    Work {
        /// Index into the coordinator's permuter list.
        permuter_index: usize,
        /// The seed to evaluate.
        seed: SeedTuple,
    },
    /// No more work is coming; the worker should finish and report.
    Finished {
        /// Optional human-readable reason, printed by the coordinator.
        reason: Option<String>,
    },
}

/// A unit of feedback flowing from a worker back to the coordinator's main
/// loop, optionally tagged with an originator identity (used for display,
/// e.g. `"local"` or a remote server's nickname).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// A dispatched task finished evaluating.
    WorkDone {
        /// Index into the coordinator's permuter list.
        permuter_index: usize,
        /// The result of the evaluation.
        result: EvalResult,
    },
    /// The worker's input queue ran dry; feed it more work.
    NeedMoreWork,
    /// A message to print as-is (e.g. a remote session status line).
    Message(String),
    /// The worker (or remote session) has finished and will send no more
    /// feedback.
    Finished {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}

/// A `Feedback` item paired with the identity of whoever emitted it, as used
/// on the coordinator's single feedback channel.
pub type FeedbackItem = (Feedback, Option<String>);
