//! The `Permuter`: identity, compiled scorer/compiler handles, best-score
//! tracking, and the `evaluate` pure function that ties them together.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::eval::{CandidateResult, EvalError, EvalResult, ProfilerStats};
use crate::seed::SeedTuple;
use crate::PENALTY_INF;

/// The permuter — generation of a new C source from `(base source, seed)` —
/// is an external collaborator. This trait is the seam the
/// coordinator calls through; a real implementation shells out to (or
/// links) the actual permutation algorithm.
pub trait CandidateGenerator: Send + Sync {
    /// Produce a new candidate C source from the base source and a seed.
    fn generate(&self, base_source: &str, seed: SeedTuple) -> Result<String, String>;
}

/// The compiler is an external collaborator: invoked as an
/// opaque subprocess, returning object bytes or a failure message.
pub trait CompilerHandle: Send + Sync {
    /// Compile `source`, returning the resulting object file bytes.
    fn compile(&self, source: &str) -> Result<Vec<u8>, String>;
}

/// The scorer is an external collaborator: compares an
/// assembled object file against the target and returns a nonnegative
/// distance, or an error.
pub trait ScorerHandle: Send + Sync {
    /// Score `object` against this scorer's target, returning
    /// `(score, hash)`. A scorer that cannot produce a usable result
    /// should return `Ok((PENALTY_INF, hash))` rather than an `Err` — `Err`
    /// is reserved for scorer-internal failures.
    fn score(&self, object: &[u8]) -> Result<(i64, String), String>;
}

/// Static identity and seed-mode configuration for one permuter.
#[derive(Debug, Clone)]
pub struct PermuterConfig {
    /// The job directory this permuter was loaded from.
    pub dir: PathBuf,
    /// Target function name, if `function.txt` was present.
    pub fn_name: Option<String>,
    /// Display name, disambiguated with the directory when multiple jobs
    /// share a function name.
    pub unique_name: String,
    /// Preprocessed base C source.
    pub base_source: String,
    /// Probability of continuing to mutate the previous randomized output.
    pub keep_prob: f64,
    /// Whether every evaluated candidate must carry its source (set by
    /// `--print-diffs`), not just improvements/ties.
    pub need_all_sources: bool,
    /// `compile.sh`'s contents, carried so a remote session can replay this
    /// permuter's definition to a server it registers with.
    pub compile_script: String,
    /// `target.o`'s bytes, carried for the same reason.
    pub target_o_bin: Vec<u8>,
    /// Whether the scorer should take stack layout differences into account.
    pub stack_differences: bool,
}

/// A permuter: identity, compiled compiler/scorer handles, the candidate
/// generator, and the best score observed so far.
///
/// `best_score` only ever decreases: readers across
/// worker threads observe a monotonically non-increasing value.
pub struct Permuter {
    /// Static configuration.
    pub config: PermuterConfig,
    /// Compiled scorer handle for this permuter's target object.
    pub scorer: Arc<dyn ScorerHandle>,
    /// Compiled compiler handle for this permuter's `compile.sh`.
    pub compiler: Arc<dyn CompilerHandle>,
    /// Candidate generator (the out-of-scope "permuter" proper).
    pub generator: Arc<dyn CandidateGenerator>,
    base_score: i64,
    best_score: AtomicI64,
}

impl Permuter {
    /// Construct a permuter with its baseline score already computed.
    pub fn new(
        config: PermuterConfig,
        scorer: Arc<dyn ScorerHandle>,
        compiler: Arc<dyn CompilerHandle>,
        generator: Arc<dyn CandidateGenerator>,
        base_score: i64,
    ) -> Self {
        Self {
            config,
            scorer,
            compiler,
            generator,
            base_score,
            best_score: AtomicI64::new(base_score),
        }
    }

    /// The baseline score computed once at startup (never changes).
    pub fn base_score(&self) -> i64 {
        self.base_score
    }

    /// The best score observed so far (monotonically non-increasing).
    pub fn best_score(&self) -> i64 {
        self.best_score.load(Ordering::SeqCst)
    }

    /// True iff `result` should be written out: it's an improvement, a tie,
    /// or this permuter was configured to want every source
    /// (`need_all_sources`).
    pub fn should_output(&self, result: &CandidateResult) -> bool {
        result.score <= self.best_score() || self.config.need_all_sources
    }

    /// Atomically record `result` as the new best if it strictly improves
    /// on the current best. Returns the best score *before* this update, so
    /// callers can classify the improvement (strict/tie/below-baseline).
    pub fn record_result(&self, result: &CandidateResult) -> i64 {
        let mut former = self.best_score.load(Ordering::SeqCst);
        while result.score < former {
            match self.best_score.compare_exchange_weak(
                former,
                result.score,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => former = actual,
            }
        }
        former
    }

    /// Generate, compile, and score a candidate for `seed` — the "pure
    /// function" `evaluate(permuter_id, seed) -> Result`.
    pub fn evaluate(&self, seed: SeedTuple) -> EvalResult {
        let mut profiler = ProfilerStats::default();

        let t0 = Instant::now();
        let source = match self.generator.generate(&self.config.base_source, seed) {
            Ok(s) => s,
            Err(exc_str) => {
                return EvalResult::Error(EvalError { exc_str, seed: Some(seed) });
            }
        };
        profiler.add_stat("permute", t0.elapsed());

        let need_source = self.config.need_all_sources;

        let t1 = Instant::now();
        let object = match self.compiler.compile(&source) {
            Ok(o) => o,
            Err(exc_str) => {
                return EvalResult::Error(EvalError { exc_str, seed: Some(seed) });
            }
        };
        profiler.add_stat("compile", t1.elapsed());

        let t2 = Instant::now();
        let (score, hash) = match self.scorer.score(&object) {
            Ok(v) => v,
            Err(exc_str) => {
                return EvalResult::Error(EvalError { exc_str, seed: Some(seed) });
            }
        };
        profiler.add_stat("score", t2.elapsed());

        let is_improvement = score <= self.best_score();
        let source = if is_improvement || need_source {
            Some(source)
        } else {
            None
        };

        EvalResult::Candidate(CandidateResult { score, hash, profiler, source })
    }

    /// Unified-style diff of `candidate` against the base source, for
    /// `--print-diffs` and the `diff.txt` output file.
    pub fn diff(&self, candidate: &str) -> String {
        use similar::{ChangeTag, TextDiff};

        let diff = TextDiff::from_lines(&self.config.base_source, candidate);
        let mut out = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            out.push_str(sign);
            out.push_str(change.as_str().unwrap_or(""));
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// Classification of an improving result, used for the coordinator's
/// user-visible messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementKind {
    /// Strictly better than any score seen before.
    StrictBest,
    /// Equal to the best score seen before.
    TieBest,
    /// Better than the baseline but not the best seen.
    BelowBaselineNotBest,
    /// Same score as the baseline/best, but different object code.
    DifferentAsmSameScore,
}

impl ImprovementKind {
    /// Classify `result` given the former best score and this permuter's
    /// baseline, matching `post_score`'s four-way message selection.
    pub fn classify(score: i64, former_best: i64, base_score: i64) -> Self {
        if score < former_best {
            ImprovementKind::StrictBest
        } else if score == former_best {
            ImprovementKind::TieBest
        } else if score < base_score {
            ImprovementKind::BelowBaselineNotBest
        } else {
            ImprovementKind::DifferentAsmSameScore
        }
    }
}

/// Convenience: is this score the unusable-scorer sentinel?
pub fn is_penalty(score: i64) -> bool {
    score == PENALTY_INF
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoGenerator;
    impl CandidateGenerator for EchoGenerator {
        fn generate(&self, base_source: &str, _seed: SeedTuple) -> Result<String, String> {
            Ok(base_source.to_string())
        }
    }

    struct FixedCompiler;
    impl CompilerHandle for FixedCompiler {
        fn compile(&self, source: &str) -> Result<Vec<u8>, String> {
            Ok(source.as_bytes().to_vec())
        }
    }

    struct ScriptedScorer(Mutex<Vec<i64>>);
    impl ScorerHandle for ScriptedScorer {
        fn score(&self, _object: &[u8]) -> Result<(i64, String), String> {
            let mut scores = self.0.lock().unwrap();
            Ok((scores.remove(0), "h".to_string()))
        }
    }

    fn make_permuter(scores: Vec<i64>, base_score: i64) -> Permuter {
        let config = PermuterConfig {
            dir: PathBuf::from("/tmp/job"),
            fn_name: None,
            unique_name: "job".to_string(),
            base_source: "int f(void) { return 0; }".to_string(),
            keep_prob: 0.6,
            need_all_sources: false,
            compile_script: "#!/bin/sh\n".to_string(),
            target_o_bin: Vec::new(),
            stack_differences: false,
        };
        Permuter::new(
            config,
            Arc::new(ScriptedScorer(Mutex::new(scores))),
            Arc::new(FixedCompiler),
            Arc::new(EchoGenerator),
            base_score,
        )
    }

    #[test]
    fn best_score_is_monotonically_non_increasing() {
        let perm = make_permuter(vec![10, 20, 5, 5, 30], 10);
        let mut seen_best = perm.best_score();
        for _ in 0..5 {
            let result = perm.evaluate(SeedTuple::fresh(1));
            if let EvalResult::Candidate(c) = &result {
                if perm.should_output(c) {
                    perm.record_result(c);
                }
            }
            let now = perm.best_score();
            assert!(now <= seen_best);
            seen_best = now;
        }
        assert_eq!(perm.best_score(), 5);
    }

    #[test]
    fn should_output_true_for_improvement_tie_or_need_all() {
        let perm = make_permuter(vec![], 10);
        let tie = CandidateResult { score: 10, hash: "a".into(), profiler: Default::default(), source: None };
        let better = CandidateResult { score: 3, hash: "b".into(), profiler: Default::default(), source: None };
        let worse = CandidateResult { score: 20, hash: "c".into(), profiler: Default::default(), source: None };
        assert!(perm.should_output(&tie));
        assert!(perm.should_output(&better));
        assert!(!perm.should_output(&worse));
    }
}
