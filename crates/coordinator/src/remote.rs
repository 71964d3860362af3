//! One remote evaluator host: a dedicated thread owns the encrypted port
//! and alternately drains queued outgoing messages and waits for server
//! updates, translating both into the coordinator's `Task`/`Feedback`
//! vocabulary.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use ed25519_dalek::{SigningKey, VerifyingKey};

use pah_core::eval::{CandidateResult, EvalError, EvalResult, ProfilerStats};
use pah_core::task::{Feedback, FeedbackItem};
use pah_core::wire_data::PermuterDataFields;
use pah_wire::envelope::{ClientToServer, ServerToClient, UpdateBody};
use pah_wire::{Port, WireError};

/// One outgoing instruction for a remote session's writer side.
#[derive(Debug, Clone)]
pub enum RemoteCommand {
    /// Register a permuter, with its two raw payloads sent immediately after.
    Add { permuter: usize, data: PermuterDataFields, source: Vec<u8>, target_o_bin: Vec<u8> },
    /// Evaluate one seed.
    Work(ClientToServer),
    /// Drop a permuter.
    Remove { permuter: usize },
    /// Keep-alive.
    Heartbeat,
    /// Close the session.
    Disconnect,
}

/// A running connection to one remote evaluator host.
pub struct RemoteSession {
    handle: JoinHandle<()>,
    cmd_tx: Sender<RemoteCommand>,
}

impl RemoteSession {
    /// Connect and authenticate to `addr`, then start its dedicated thread.
    /// `origin` tags every [`FeedbackItem`] this session produces (normally
    /// the server's display nickname).
    pub fn connect(
        addr: &str,
        identity: Arc<SigningKey>,
        authorized_server_keys: Arc<Vec<VerifyingKey>>,
        priority: f64,
        feedback_tx: Sender<FeedbackItem>,
        origin: String,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let mut port = Port::connect(stream, identity.as_ref(), authorized_server_keys.as_slice())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        port.send_json(&ClientToServer::Hello { priority })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let handle = std::thread::spawn(move || session_loop(port, cmd_rx, feedback_tx, origin));
        Ok(Self { handle, cmd_tx })
    }

    /// Queue an outgoing command for this session's writer loop.
    pub fn send(&self, cmd: RemoteCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// Request the session close and wait for its thread to exit.
    pub fn disconnect_and_join(self) {
        let _ = self.cmd_tx.send(RemoteCommand::Disconnect);
        let _ = self.handle.join();
    }
}

fn update_to_eval_result(update: &UpdateBody) -> Option<EvalResult> {
    match update {
        UpdateBody::Work { success, score, hash, error, .. } => Some(if *success {
            EvalResult::Candidate(CandidateResult {
                score: score.unwrap_or(pah_core::PENALTY_INF),
                hash: hash.clone().unwrap_or_default(),
                profiler: ProfilerStats::default(),
                source: None,
            })
        } else {
            EvalResult::Error(EvalError {
                exc_str: error.clone().unwrap_or_default(),
                seed: update.seed(),
            })
        }),
        _ => None,
    }
}

fn session_loop(
    mut port: Port<TcpStream>,
    cmd_rx: Receiver<RemoteCommand>,
    feedback_tx: Sender<FeedbackItem>,
    origin: String,
) {
    loop {
        // Drain everything already queued before blocking on the network.
        loop {
            match cmd_rx.try_recv() {
                Ok(RemoteCommand::Disconnect) => {
                    let _ = feedback_tx.send((Feedback::Finished { reason: None }, Some(origin.clone())));
                    return;
                }
                Ok(cmd) => {
                    if let Err(err) = apply_command(&mut port, cmd) {
                        report_error(&feedback_tx, &origin, err);
                        return;
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    let _ = feedback_tx.send((Feedback::Finished { reason: None }, Some(origin.clone())));
                    return;
                }
            }
        }

        // Block (briefly) waiting for either a server update or new outgoing
        // work, whichever comes first is handled; the recv below has no
        // built-in timeout so we rely on the server's own heartbeat cadence
        // to keep this from stalling forever on a dead connection.
        match port.recv_json::<ServerToClient>() {
            Ok(ServerToClient::Update { permuter, time_us: _, update }) => {
                if let Some(result) = update_to_eval_result(&update) {
                    let _ = feedback_tx.send((
                        Feedback::WorkDone { permuter_index: permuter, result },
                        Some(origin.clone()),
                    ));
                } else if let UpdateBody::Disconnect { reason } = update {
                    let _ = feedback_tx.send((Feedback::Finished { reason }, Some(origin.clone())));
                }
            }
            Ok(ServerToClient::NeedWork) => {
                let _ = feedback_tx.send((Feedback::NeedMoreWork, Some(origin.clone())));
            }
            Err(err) => {
                report_error(&feedback_tx, &origin, err);
                return;
            }
        }

        // Give the writer side a chance to queue a heartbeat between reads.
        std::thread::sleep(Duration::from_millis(0));
    }
}

fn report_error(feedback_tx: &Sender<FeedbackItem>, origin: &str, err: WireError) {
    let reason = if err.is_eof() { None } else { Some(err.to_string()) };
    let _ = feedback_tx.send((Feedback::Finished { reason }, Some(origin.to_string())));
}

fn apply_command(port: &mut Port<TcpStream>, cmd: RemoteCommand) -> Result<(), WireError> {
    match cmd {
        RemoteCommand::Add { permuter, data, source, target_o_bin } => {
            port.send_json(&ClientToServer::Add {
                permuter,
                client_id: String::new(),
                client_name: String::new(),
                data,
            })?;
            port.send_compressed(&source)?;
            port.send_compressed(&target_o_bin)?;
            Ok(())
        }
        RemoteCommand::Work(msg) => port.send_json(&msg),
        RemoteCommand::Remove { permuter } => port.send_json(&ClientToServer::Remove { permuter }),
        RemoteCommand::Heartbeat => port.send_json(&ClientToServer::Heartbeat),
        RemoteCommand::Disconnect => Ok(()),
    }
}
