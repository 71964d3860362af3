mod cli;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use clap::Parser;
use ed25519_dalek::VerifyingKey;

use pah_coordinator::auth;
use pah_coordinator::jobdir::{unique_names, JobDirectory};
use pah_coordinator::remote::RemoteSession;
use pah_coordinator::run::{Coordinator, CoordinatorConfig, CoordinatorOutcome};
use pah_core::identity::SigningIdentity;
use pah_core::permuter::{CompilerHandle, Permuter, PermuterConfig, ScorerHandle};
use pah_core::seed::SeedTuple;
use pah_core::subprocess::{ShellCandidateGenerator, ShellCompiler, ShellScorer};
use pah_core::task::FeedbackItem;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let identity = auth::setup()?;

    if cli.vouch {
        println!("{}", auth::run_vouch(&identity, "one-shot enrollment request"));
        return Ok(());
    }

    if cli.network && (cli.directory_url.is_none() || cli.directory_pub.is_none()) {
        anyhow::bail!("-J requires both --directory-url and --directory-pub");
    }
    if !(pah_wire::envelope::MIN_PRIORITY..=pah_wire::envelope::MAX_PRIORITY).contains(&cli.priority) {
        anyhow::bail!(
            "--priority must be between {} and {}",
            pah_wire::envelope::MIN_PRIORITY,
            pah_wire::envelope::MAX_PRIORITY
        );
    }

    let forced_seed = cli
        .seed
        .as_deref()
        .map(SeedTuple::parse)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let jobs: Vec<JobDirectory> = cli
        .job_dirs
        .iter()
        .map(|dir| JobDirectory::load(dir).map_err(anyhow::Error::from))
        .collect::<anyhow::Result<_>>()?;
    let names = unique_names(&jobs);

    let permuters: Vec<Permuter> = jobs
        .iter()
        .zip(names)
        .map(|(job, unique_name)| build_permuter(job, unique_name, &cli))
        .collect::<anyhow::Result<_>>()?;

    let config = CoordinatorConfig {
        num_local_threads: cli.num_local_threads(),
        show_errors: cli.show_errors,
        show_timings: cli.show_timings,
        print_diffs: cli.print_diffs,
        stop_on_zero: cli.stop_on_zero,
        abort_exceptions: cli.abort_exceptions,
        forced_seed,
        keep_prob: cli.keep_prob,
    };
    let coordinator = Coordinator::new(config, permuters);

    let remotes = if cli.network {
        connect_remotes(&cli, &identity, coordinator.feedback_handle())?
    } else {
        Vec::new()
    };
    if cli.network && remotes.is_empty() {
        anyhow::bail!("-J was given but no remote server could be reached");
    }

    match coordinator.run(remotes) {
        CoordinatorOutcome::Aborted(reason) => {
            eprintln!("aborted: {reason}");
            std::process::exit(1);
        }
        _ => Ok(()),
    }
}

/// Load the compile/score/generate handles for one job directory and
/// compute its baseline score.
fn build_permuter(job: &JobDirectory, unique_name: String, cli: &Cli) -> anyhow::Result<Permuter> {
    let fn_name = job.fn_name.clone().unwrap_or_default();

    let compiler = Arc::new(ShellCompiler {
        compile_script: job.dir.join("compile.sh"),
        fn_name: fn_name.clone(),
        show_errors: cli.show_errors,
    });
    let scorer = Arc::new(ShellScorer {
        scorer_bin: cli.scorer_bin.clone(),
        target_o: job.dir.join("target.o"),
        stack_differences: cli.stack_diffs,
    });
    let generator = Arc::new(ShellCandidateGenerator {
        permuter_bin: cli.permuter_bin.clone(),
        fn_name,
    });

    let config = PermuterConfig {
        dir: job.dir.clone(),
        fn_name: job.fn_name.clone(),
        unique_name: unique_name.clone(),
        base_source: job.base_source.clone(),
        keep_prob: cli.keep_prob,
        need_all_sources: cli.print_diffs,
        compile_script: job.compile_script.clone(),
        target_o_bin: job.target_o_bin.clone(),
        stack_differences: cli.stack_diffs,
    };

    let base_object = compiler
        .compile(&config.base_source)
        .map_err(|e| anyhow::anyhow!("{unique_name}: base compile failed: {e}"))?;
    let (base_score, _base_hash) = scorer
        .score(&base_object)
        .map_err(|e| anyhow::anyhow!("{unique_name}: base score failed: {e}"))?;
    println!("[{unique_name}] base score = {base_score}");

    Ok(Permuter::new(config, scorer, compiler, generator, base_score))
}

/// Fetch the signed server list from the directory service and connect a
/// session to every server it names, skipping (with a warning) any that
/// can't be reached.
fn connect_remotes(
    cli: &Cli,
    identity: &SigningIdentity,
    feedback_tx: crossbeam_channel::Sender<FeedbackItem>,
) -> anyhow::Result<Vec<(String, RemoteSession)>> {
    let directory_url = cli.directory_url.as_deref().expect("checked by caller");
    let directory_pub = decode_verifying_key(cli.directory_pub.as_deref().expect("checked by caller"))?;

    let entries = auth::fetch_servers_and_grant(directory_url, &directory_pub)?;
    let signing_key = Arc::new(identity.signing_key().clone());

    let mut remotes = Vec::new();
    for entry in entries {
        let server_pub = match decode_verifying_key(&entry.identity_pub_b64) {
            Ok(key) => key,
            Err(err) => {
                eprintln!("warning: bad identity for server {}: {err}", entry.nickname);
                continue;
            }
        };
        let authorized: Arc<Vec<VerifyingKey>> = Arc::new(vec![server_pub]);
        match RemoteSession::connect(
            &entry.address,
            signing_key.clone(),
            authorized,
            cli.priority,
            feedback_tx.clone(),
            entry.nickname.clone(),
        ) {
            Ok(session) => remotes.push((entry.nickname, session)),
            Err(err) => eprintln!("warning: failed to connect to {}: {err}", entry.nickname),
        }
    }
    Ok(remotes)
}

fn decode_verifying_key(b64: &str) -> anyhow::Result<VerifyingKey> {
    let bytes = B64.decode(b64)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
    Ok(VerifyingKey::from_bytes(&arr)?)
}
