//! Lifecycle of one sandboxed evaluator subprocess: spawn, the
//! thousand-NUL-byte pipe sanity check, then the framed JSON
//! `ServerToEvaluator` / `EvaluatorToServer` protocol over its stdio pipes.
//!
//! Evaluator subprocesses are local and already sandboxed (container or
//! restricted user); unlike client connections they don't get the
//! `pah-wire` encryption handshake, only its framing — there's no network
//! hop to protect against here, just a pipe to a process this host itself
//! started. Each `Add` message is immediately followed by two raw
//! zlib-compressed frames (`source`, `target_o_bin`), same convention as a
//! client's `Add` over the encrypted port; a `Result` whose `has_source`
//! flag is set is likewise followed by one more compressed frame carrying
//! the winning candidate's source.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use pah_wire::compress;
use pah_wire::envelope::{EvaluatorToServer, ServerToEvaluator};
use pah_wire::frame::{read_frame, write_frame};
use pah_core::wire_data::PermuterDataFields;

use crate::activity::{Activity, PermHandle};

/// Number of NUL bytes exchanged as a sanity check right after spawning,
/// before any protocol traffic: catches a sandbox image whose entrypoint
/// doesn't actually run the evaluator, or pipes wired up backwards.
const SANITY_BYTE_COUNT: usize = 1000;

/// Errors standing up an evaluator subprocess.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("failed to spawn evaluator: {0}")]
    Spawn(#[source] io::Error),
    #[error("evaluator did not pass the pipe sanity check")]
    SanityCheckFailed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A running evaluator subprocess.
pub struct EvaluatorProcess {
    /// This evaluator's slot in the host's pool, carried on every `Activity`
    /// it produces so the main loop knows which scheduler to pull from.
    pub index: usize,
    child: Child,
    stdin: ChildStdin,
    reader_handle: JoinHandle<()>,
}

impl EvaluatorProcess {
    /// Spawn `command` (already wrapped in whatever sandbox invocation the
    /// caller wants — `docker run ...` or a bare restricted binary),
    /// perform the sanity check, and start the reader thread that
    /// publishes `Activity` events tagged with `index`.
    pub fn spawn(
        index: usize,
        command: &str,
        args: &[String],
        activity_tx: Sender<Activity>,
    ) -> Result<Self, EvaluatorError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(EvaluatorError::Spawn)?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let mut stdout = child.stdout.take().expect("piped stdout");
        sanity_check(&mut stdin, &mut stdout)?;

        if let Some(mut stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            eprint!("evaluator stderr: {}", String::from_utf8_lossy(&buf[..n]));
                        }
                    }
                }
            });
        }

        let reader_handle = std::thread::spawn(move || reader_loop(index, stdout, activity_tx));

        Ok(Self { index, child, stdin, reader_handle })
    }

    /// Register a permuter with this evaluator, followed by its raw source
    /// and target object frames.
    pub fn send_add(
        &mut self,
        id: u64,
        data: PermuterDataFields,
        source: &[u8],
        target_o_bin: &[u8],
    ) -> io::Result<()> {
        self.send(&ServerToEvaluator::Add { id, data })?;
        write_frame(&mut self.stdin, &compress::compress(source)).map_err(wire_to_io)?;
        write_frame(&mut self.stdin, &compress::compress(target_o_bin)).map_err(wire_to_io)?;
        Ok(())
    }

    /// Send one message to the evaluator (`Work` or `Remove`; `Add` goes
    /// through [`EvaluatorProcess::send_add`]).
    pub fn send(&mut self, msg: &ServerToEvaluator) -> io::Result<()> {
        let bytes = serde_json::to_vec(msg)?;
        write_frame(&mut self.stdin, &bytes).map_err(wire_to_io)
    }

    /// Kill the subprocess and wait for its reader thread to finish.
    pub fn kill_and_join(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = self.reader_handle.join();
    }
}

fn wire_to_io(err: pah_wire::WireError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn sanity_check(stdin: &mut ChildStdin, stdout: &mut ChildStdout) -> Result<(), EvaluatorError> {
    stdin.write_all(&[0u8; SANITY_BYTE_COUNT])?;
    stdin.flush()?;
    let mut buf = [0u8; SANITY_BYTE_COUNT];
    stdout.read_exact(&mut buf)?;
    if buf.iter().any(|&b| b != 0) {
        return Err(EvaluatorError::SanityCheckFailed);
    }
    Ok(())
}

fn reader_loop(index: usize, mut stdout: ChildStdout, activity_tx: Sender<Activity>) {
    loop {
        let bytes = match read_frame(&mut stdout) {
            Ok(bytes) => bytes,
            Err(err) => {
                let reason = if err.is_eof() { "evaluator exited".to_string() } else { err.to_string() };
                let _ = activity_tx.send(Activity::EvaluatorDisconnected { evaluator: index, reason });
                return;
            }
        };
        let msg: EvaluatorToServer = match serde_json::from_slice(&bytes) {
            Ok(msg) => msg,
            Err(err) => {
                let _ = activity_tx.send(Activity::EvaluatorDisconnected {
                    evaluator: index,
                    reason: format!("malformed message: {err}"),
                });
                return;
            }
        };
        let activity = match msg {
            EvaluatorToServer::Init { id, time_us, success, base_score, base_hash, error } => {
                Activity::EvaluatorInitResult {
                    handle: PermHandle(id),
                    time_us,
                    success,
                    base_score,
                    base_hash,
                    error,
                }
            }
            EvaluatorToServer::Result {
                id, time_us, success, score, hash, ref error, has_source, ..
            } => {
                let seed = msg.seed().unwrap_or(pah_core::seed::SeedTuple::fresh(0));
                let source = if has_source {
                    match read_frame(&mut stdout).map_err(|e| e.to_string()).and_then(|bytes| {
                        compress::decompress(&bytes)
                            .map_err(|e| e.to_string())
                            .and_then(|raw| String::from_utf8(raw).map_err(|e| e.to_string()))
                    }) {
                        Ok(source) => Some(source),
                        Err(err) => {
                            let _ = activity_tx.send(Activity::EvaluatorDisconnected {
                                evaluator: index,
                                reason: format!("failed to read candidate source: {err}"),
                            });
                            return;
                        }
                    }
                } else {
                    None
                };
                Activity::EvaluatorWorkResult {
                    handle: PermHandle(id),
                    seed,
                    time_us,
                    success,
                    score,
                    hash,
                    error: error.clone(),
                    has_source,
                    source,
                }
            }
            EvaluatorToServer::NeedWork => Activity::EvaluatorNeedWork { evaluator: index },
        };
        if activity_tx.send(activity).is_err() {
            return;
        }
    }
}
