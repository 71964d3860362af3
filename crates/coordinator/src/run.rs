//! The driver's main loop: fair seed dispatch across local and remote
//! workers, feedback aggregation, output writing, and the
//! Feeding/Draining/Stopped state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use pah_core::eval::EvalResult;
use pah_core::permuter::{ImprovementKind, Permuter};
use pah_core::seed::{cycle_seeds, FairRoundRobin, ForcedSeedIterator, RandomizedSeedIterator, SeedIterator, SeedTuple};
use pah_core::task::{Feedback, FeedbackItem, Task};
use pah_core::wire_data::{permuter_data_to_json, PermuterData};

use crate::local::LocalWorkerPool;
use crate::output::write_output;
use crate::printer::Printer;
use crate::profiler::Profiler;
use crate::remote::{RemoteCommand, RemoteSession};
use crate::shutdown::{install_ctrl_c_handler, ShutdownController, ShutdownEvent};

/// Static configuration for one coordinator run.
pub struct CoordinatorConfig {
    /// Number of local worker threads (0 disables local evaluation).
    pub num_local_threads: usize,
    /// Print every internal evaluation error (`--show-errors`).
    pub show_errors: bool,
    /// Print a rolling timing report at the end (`--show-timings`).
    pub show_timings: bool,
    /// Print a unified diff alongside every output (`--print-diffs`);
    /// this also forces every candidate to carry its source.
    pub print_diffs: bool,
    /// Stop the whole run as soon as any permuter reaches score 0.
    pub stop_on_zero: bool,
    /// Treat any internal evaluation error as fatal to the whole run.
    pub abort_exceptions: bool,
    /// Force a specific seed (single-shot reproduction run) rather than
    /// randomized search; applies to every permuter.
    pub forced_seed: Option<SeedTuple>,
    /// Probability of "keep mutating previous output" for randomized search.
    pub keep_prob: f64,
}

/// Why a coordinator run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorOutcome {
    /// Ctrl+C requested a graceful stop.
    UserRequested,
    /// `--stop-on-zero` was satisfied.
    ZeroReached,
    /// `--seed` reproduction run exhausted its single seed.
    ReproductionDone,
    /// An internal error was fatal under `--abort-exceptions`.
    Aborted(String),
}

/// Reassemble the wire-shaped [`PermuterData`] for one permuter from its
/// [`PermuterConfig`](pah_core::permuter::PermuterConfig), so it can be
/// registered with a remote server via `RemoteCommand::Add`.
fn permuter_wire_data(permuter: &Permuter) -> PermuterData {
    let config = &permuter.config;
    PermuterData {
        fn_name: config.fn_name.clone(),
        filename: config.unique_name.clone(),
        keep_prob: config.keep_prob,
        stack_differences: config.stack_differences,
        compile_script: config.compile_script.clone(),
        source: config.base_source.clone(),
        target_o_bin: config.target_o_bin.clone(),
    }
}

enum DriverState {
    Feeding,
    Draining,
    Stopped,
}

/// What the main loop should do after one evaluation result is applied.
enum WorkDoneSignal {
    Continue,
    StopOnZero,
    Abort(String),
}

/// Owns the permuters, local worker pool, and any remote sessions for one
/// run, and drives the fair-dispatch main loop.
pub struct Coordinator {
    config: CoordinatorConfig,
    permuters: Arc<Vec<Permuter>>,
    printer: Printer,
    profiler: Profiler,
    feedback_tx: Sender<FeedbackItem>,
    feedback_rx: Receiver<FeedbackItem>,
}

impl Coordinator {
    /// Build a coordinator over an already-loaded set of permuters.
    pub fn new(config: CoordinatorConfig, permuters: Vec<Permuter>) -> Self {
        let (feedback_tx, feedback_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            permuters: Arc::new(permuters),
            printer: Printer::new(),
            profiler: Profiler::new(),
            feedback_tx,
            feedback_rx,
        }
    }

    /// The sender every [`RemoteSession`] must be constructed with so its
    /// feedback reaches this coordinator's main loop — connect remote
    /// sessions with this before calling [`Coordinator::run`].
    pub fn feedback_handle(&self) -> Sender<FeedbackItem> {
        self.feedback_tx.clone()
    }

    fn build_seed_iter(&self) -> FairRoundRobin {
        let iters: Vec<(usize, Box<dyn SeedIterator>)> = (0..self.permuters.len())
            .map(|i| {
                let it: Box<dyn SeedIterator> = match self.config.forced_seed {
                    Some(seed) => Box::new(ForcedSeedIterator::new(seed)),
                    None => Box::new(RandomizedSeedIterator::new(self.config.keep_prob)),
                };
                (i, it)
            })
            .collect();
        cycle_seeds(iters)
    }

    /// Run until Ctrl+C, `--stop-on-zero`, reproduction exhaustion, or a
    /// fatal error under `--abort-exceptions`.
    pub fn run(&self, remotes: Vec<(String, RemoteSession)>) -> CoordinatorOutcome {
        let feedback_tx = self.feedback_tx.clone();
        let feedback_rx = self.feedback_rx.clone();
        let (task_tx, task_rx) = crossbeam_channel::unbounded();

        let local_pool = if self.config.num_local_threads > 0 {
            Some(LocalWorkerPool::spawn(
                self.config.num_local_threads,
                self.permuters.clone(),
                task_rx,
                feedback_tx.clone(),
                "local",
            ))
        } else {
            None
        };

        let remote_cmd_txs: HashMap<String, RemoteSession> = remotes.into_iter().collect();
        if !remote_cmd_txs.is_empty() {
            let adds: Vec<RemoteCommand> = self
                .permuters
                .iter()
                .enumerate()
                .map(|(index, permuter)| {
                    let (data, source, target_o_bin) = permuter_data_to_json(&permuter_wire_data(permuter));
                    RemoteCommand::Add { permuter: index, data, source, target_o_bin }
                })
                .collect();
            for session in remote_cmd_txs.values() {
                for cmd in &adds {
                    session.send(cmd.clone());
                }
            }
        }

        let shutdown_controller = Arc::new(ShutdownController::new());
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::unbounded();
        let _ = install_ctrl_c_handler(shutdown_controller, shutdown_tx);

        let mut seed_iter = self.build_seed_iter();
        let mut state = DriverState::Feeding;
        let mut outcome = CoordinatorOutcome::UserRequested;
        let mut drain_ticks_idle = 0u32;
        let local_capacity = self.config.num_local_threads.max(1);

        // Prime the queue so every local worker has a seed waiting.
        if self.config.num_local_threads > 0 {
            for _ in 0..local_capacity {
                if !self.dispatch_next(&mut seed_iter, &task_tx, &remote_cmd_txs, "local") {
                    break;
                }
            }
        }
        for name in remote_cmd_txs.keys() {
            self.dispatch_next(&mut seed_iter, &task_tx, &remote_cmd_txs, name);
        }

        loop {
            if matches!(state, DriverState::Stopped) {
                break;
            }

            crossbeam_channel::select! {
                recv(shutdown_rx) -> ev => {
                    match ev {
                        Ok(ShutdownEvent::Graceful) => {
                            self.printer.message("received interrupt, draining outstanding work...");
                            state = DriverState::Draining;
                            outcome = CoordinatorOutcome::UserRequested;
                        }
                        Ok(ShutdownEvent::Immediate) => {
                            self.printer.message("second interrupt, exiting immediately");
                            outcome = CoordinatorOutcome::UserRequested;
                            state = DriverState::Stopped;
                        }
                        Err(_) => {}
                    }
                }
                recv(feedback_rx) -> item => {
                    let Ok((feedback, origin)) = item else { state = DriverState::Stopped; continue };
                    match feedback {
                        Feedback::WorkDone { permuter_index, result } => {
                            drain_ticks_idle = 0;
                            if matches!(state, DriverState::Feeding) {
                                let dest = origin.as_deref().unwrap_or("local");
                                self.dispatch_next(&mut seed_iter, &task_tx, &remote_cmd_txs, dest);
                            }
                            match self.handle_work_done(permuter_index, result) {
                                WorkDoneSignal::StopOnZero => {
                                    outcome = CoordinatorOutcome::ZeroReached;
                                    state = DriverState::Draining;
                                }
                                WorkDoneSignal::Abort(reason) => {
                                    outcome = CoordinatorOutcome::Aborted(reason);
                                    state = DriverState::Stopped;
                                }
                                WorkDoneSignal::Continue => {}
                            }
                        }
                        Feedback::NeedMoreWork => {
                            if matches!(state, DriverState::Feeding) {
                                let dest = origin.as_deref().unwrap_or("local");
                                self.dispatch_next(&mut seed_iter, &task_tx, &remote_cmd_txs, dest);
                            }
                        }
                        Feedback::Message(msg) => self.printer.message(&msg),
                        Feedback::Finished { reason } => {
                            if let Some(reason) = reason {
                                self.printer.message(&format!("{}: {reason}", origin.as_deref().unwrap_or("worker")));
                            }
                            if self.config.forced_seed.is_some() {
                                outcome = CoordinatorOutcome::ReproductionDone;
                                state = DriverState::Stopped;
                            }
                        }
                    }
                }
                default(Duration::from_millis(200)) => {
                    if matches!(state, DriverState::Draining) {
                        drain_ticks_idle += 1;
                    }
                }
            }

            // Evaluations finish in well under a second; a couple of idle
            // select ticks after draining starts means every in-flight
            // result has already been reported.
            if matches!(state, DriverState::Draining) && drain_ticks_idle >= 2 {
                state = DriverState::Stopped;
            }
        }

        for _ in 0..local_capacity {
            let _ = task_tx.send(Task::Finished { reason: None });
        }
        if let Some(pool) = local_pool {
            pool.join();
        }
        for (_, session) in remote_cmd_txs {
            session.disconnect_and_join();
        }

        if self.config.show_timings {
            self.printer.message(&self.profiler.report());
        }

        outcome
    }

    /// Pull the next seed and dispatch it to `dest` ("local" or a remote
    /// session's name). Returns `false` once the seed iterator is
    /// exhausted.
    fn dispatch_next(
        &self,
        seed_iter: &mut FairRoundRobin,
        task_tx: &Sender<Task>,
        remotes: &HashMap<String, RemoteSession>,
        dest: &str,
    ) -> bool {
        let Some((permuter_index, seed)) = seed_iter.next() else { return false };
        if dest == "local" {
            let _ = task_tx.send(Task::Work { permuter_index, seed });
        } else if let Some(session) = remotes.get(dest) {
            session.send(RemoteCommand::Work(pah_wire::envelope::ClientToServer::work(
                permuter_index,
                seed,
            )));
        }
        true
    }

    /// Apply one evaluation result: record/report improvements, write
    /// output, accumulate timing stats. Returns what the run loop should do
    /// next — keep going, stop because `--stop-on-zero` was satisfied, or
    /// abort because `--abort-exceptions` was set and this was an error.
    fn handle_work_done(&self, permuter_index: usize, result: EvalResult) -> WorkDoneSignal {
        let Some(permuter) = self.permuters.get(permuter_index) else { return WorkDoneSignal::Continue };
        match result {
            EvalResult::Error(err) => {
                let seed_note = err
                    .seed
                    .map(|s| format!(" (--seed {})", s.to_reproducer_string()))
                    .unwrap_or_default();
                self.printer.message(&format!(
                    "{}: internal error{seed_note}: {}",
                    permuter.config.unique_name, err.exc_str
                ));
                if self.config.abort_exceptions {
                    WorkDoneSignal::Abort(err.exc_str)
                } else {
                    WorkDoneSignal::Continue
                }
            }
            EvalResult::Candidate(candidate) => {
                self.profiler.record(&candidate.profiler);
                let is_zero = candidate.score == 0;
                if permuter.should_output(&candidate) {
                    let former_best = permuter.record_result(&candidate);
                    let kind = ImprovementKind::classify(candidate.score, former_best, permuter.base_score());
                    if let Some(source) = &candidate.source {
                        let diff = self.config.print_diffs.then(|| permuter.diff(source));
                        if let Ok(dir) = write_output(
                            &permuter.config.dir,
                            candidate.score,
                            &permuter.config.base_source,
                            source,
                            diff.as_deref(),
                        ) {
                            self.printer.message(&format!(
                                "{}: {:?} score {} -> {}",
                                permuter.config.unique_name,
                                kind,
                                former_best,
                                dir.display()
                            ));
                        }
                    }
                }
                if is_zero && self.config.stop_on_zero {
                    WorkDoneSignal::StopOnZero
                } else {
                    WorkDoneSignal::Continue
                }
            }
        }
    }
}
