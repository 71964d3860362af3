use std::path::PathBuf;

use clap::Parser;

/// Distributed, randomized search over permutations of a C source, driven
/// locally and/or against remote evaluator hosts.
#[derive(Debug, Parser)]
#[command(name = "permute", version, about = "Randomized search over permutations of a C source")]
pub struct Cli {
    /// Directories containing base.c, target.o, and an executable compile.sh.
    #[arg(required_unless_present = "vouch")]
    pub job_dirs: Vec<PathBuf>,

    /// Print compiler/scorer error output and keep failed sources around.
    #[arg(long)]
    pub show_errors: bool,

    /// Print a rolling per-stage timing report when the run ends.
    #[arg(long)]
    pub show_timings: bool,

    /// Write a unified diff alongside every output; forces every candidate
    /// to carry its source, not just improvements and ties.
    #[arg(long)]
    pub print_diffs: bool,

    /// Treat any internal generate/compile/score error as fatal to the run.
    #[arg(long)]
    pub abort_exceptions: bool,

    /// Stop the run as soon as any permuter reaches score 0.
    #[arg(long)]
    pub stop_on_zero: bool,

    /// Take stack layout differences into account when scoring.
    #[arg(long)]
    pub stack_diffs: bool,

    /// Probability of continuing to mutate the previous output rather than
    /// restarting from the base source.
    #[arg(long, default_value_t = 0.6)]
    pub keep_prob: f64,

    /// Force a specific seed ("RNG" or "KEEP,RNG") for a single-shot
    /// reproduction run, bypassing randomized search.
    #[arg(long, hide = true)]
    pub seed: Option<String>,

    /// Number of local worker threads (default 1, or 0 if `-J` is given).
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Enable network workers: fetch the signed server list and dispatch
    /// work to remote evaluator hosts alongside any local threads.
    #[arg(short = 'J')]
    pub network: bool,

    /// Priority advertised to remote servers, bounded by the wire protocol's
    /// MIN_PRIORITY/MAX_PRIORITY constants.
    #[arg(long, default_value_t = 1.0)]
    pub priority: f64,

    /// Print this machine's identity fingerprint and a signed vouch token
    /// for an administrator to approve out of band, then exit.
    #[arg(long)]
    pub vouch: bool,

    /// Directory-service URL to fetch the signed server list from. Required
    /// with `-J`.
    #[arg(long, env = "PERMUTER_DIRECTORY_URL")]
    pub directory_url: Option<String>,

    /// The directory service's own pinned Ed25519 public key, base64.
    /// Required with `-J`.
    #[arg(long, env = "PERMUTER_DIRECTORY_PUB")]
    pub directory_pub: Option<String>,

    /// Path to the external candidate generator binary invoked as
    /// `<permuter-bin> <base.c> <fn_name> <keep_flag> <rng_seed>`.
    #[arg(long, env = "PERMUTER_BIN", default_value = "permuter")]
    pub permuter_bin: PathBuf,

    /// Path to the external scorer binary invoked as
    /// `<scorer-bin> <target.o> <candidate.o> [--stack-differences]`.
    #[arg(long, env = "PERMUTER_SCORER_BIN", default_value = "scorer")]
    pub scorer_bin: PathBuf,
}

impl Cli {
    /// Local worker thread count: `-j` if given, else 1 unless `-J` was
    /// given (in which case the default is 0 local threads).
    pub fn num_local_threads(&self) -> usize {
        self.jobs.unwrap_or(if self.network { 0 } else { 1 })
    }
}
