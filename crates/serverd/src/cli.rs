use clap::Parser;

/// Evaluator host: accepts coordinator sessions, hands their permuters off
/// to a pool of sandboxed evaluator subprocesses, and fairly schedules
/// seeds across however many clients are currently connected.
#[derive(Debug, Parser)]
#[command(name = "pah-serverd", version, about = "Evaluator host for remote permuter search")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PAH_SERVER_BIND", default_value = "0.0.0.0:5678")]
    pub bind: String,

    /// Command used to launch one evaluator subprocess (already wrapped in
    /// whatever sandbox invocation the operator wants, e.g. `docker run ...`).
    #[arg(long, env = "PAH_EVALUATOR_CMD", required_unless_present = "print_identity")]
    pub evaluator_command: Option<String>,

    /// One argument to pass to the evaluator command; repeat for each.
    #[arg(long = "evaluator-arg")]
    pub evaluator_args: Vec<String>,

    /// Number of evaluator subprocesses to run, typically one per core.
    #[arg(short = 'n', long = "evaluators", default_value_t = 1)]
    pub num_evaluators: usize,

    /// Base64 Ed25519 public key of a coordinator allowed to connect;
    /// repeat for each. If none are given, any coordinator may connect.
    #[arg(long = "authorized-key")]
    pub authorized_keys: Vec<String>,

    /// Sessions advertising a lower `--priority` than this are rejected at
    /// handshake time.
    #[arg(long, default_value_t = 0.0)]
    pub min_priority: f64,

    /// Seconds of no client activity before logging that the host is
    /// about to sleep.
    #[arg(long, default_value_t = 30)]
    pub idle_announce_secs: u64,

    /// Print this host's long-term identity fingerprint (for an operator
    /// to add to the directory service's signed server list) and exit.
    #[arg(long)]
    pub print_identity: bool,
}
