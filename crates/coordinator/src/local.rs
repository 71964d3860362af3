//! Local worker pool: one OS thread per local core, each pulling `Task`s
//! off a shared MPMC queue and evaluating them against an in-process
//! `Permuter`.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use pah_core::permuter::Permuter;
use pah_core::task::{Feedback, FeedbackItem, Task};

/// A running pool of local worker threads. Dropping this does not stop the
/// threads; call [`LocalWorkerPool::join`] after sending `Task::Finished`
/// on every worker's shared task channel.
pub struct LocalWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl LocalWorkerPool {
    /// Spawn `num_workers` threads, each pulling from `task_rx` and
    /// reporting to `feedback_tx` tagged with `origin` (typically
    /// `"local"`).
    pub fn spawn(
        num_workers: usize,
        permuters: Arc<Vec<Permuter>>,
        task_rx: Receiver<Task>,
        feedback_tx: Sender<FeedbackItem>,
        origin: &'static str,
    ) -> Self {
        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let permuters = permuters.clone();
            let task_rx = task_rx.clone();
            let feedback_tx = feedback_tx.clone();
            handles.push(std::thread::spawn(move || {
                worker_loop(&permuters, &task_rx, &feedback_tx, origin);
            }));
        }
        Self { handles }
    }

    /// Block until every worker thread has exited (after it has received
    /// `Task::Finished`).
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    permuters: &[Permuter],
    task_rx: &Receiver<Task>,
    feedback_tx: &Sender<FeedbackItem>,
    origin: &'static str,
) {
    loop {
        let task = match task_rx.recv() {
            Ok(task) => task,
            Err(_) => return,
        };
        match task {
            Task::Work { permuter_index, seed } => {
                let Some(permuter) = permuters.get(permuter_index) else { continue };
                let result = permuter.evaluate(seed);
                let _ = feedback_tx.send((
                    Feedback::WorkDone { permuter_index, result },
                    Some(origin.to_string()),
                ));
            }
            Task::Finished { reason } => {
                let _ = feedback_tx.send((Feedback::Finished { reason }, Some(origin.to_string())));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pah_core::eval::EvalResult;
    use pah_core::permuter::{CandidateGenerator, CompilerHandle, PermuterConfig, ScorerHandle};
    use pah_core::seed::SeedTuple;
    use std::path::PathBuf;

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
    struct FixedScorer;
    impl ScorerHandle for FixedScorer {
        fn score(&self, _object: &[u8]) -> Result<(i64, String), String> {
            Ok((0, "h".to_string()))
        }
    }

    #[test]
    fn evaluates_dispatched_work_and_reports_feedback() {
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
        let permuter = Permuter::new(
            config,
            Arc::new(FixedScorer),
            Arc::new(FixedCompiler),
            Arc::new(EchoGenerator),
            10,
        );
        let permuters = Arc::new(vec![permuter]);

        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        let (feedback_tx, feedback_rx) = crossbeam_channel::unbounded();
        let pool = LocalWorkerPool::spawn(2, permuters, task_rx, feedback_tx, "local");

        task_tx.send(Task::Work { permuter_index: 0, seed: SeedTuple::fresh(1) }).unwrap();
        let (feedback, origin) = feedback_rx.recv().unwrap();
        assert_eq!(origin.as_deref(), Some("local"));
        match feedback {
            Feedback::WorkDone { result: EvalResult::Candidate(c), .. } => assert_eq!(c.score, 0),
            other => panic!("unexpected feedback: {other:?}"),
        }

        task_tx.send(Task::Finished { reason: None }).unwrap();
        task_tx.send(Task::Finished { reason: None }).unwrap();
        pool.join();
    }
}
