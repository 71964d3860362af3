//! The single-threaded main loop: accepts client connections, spawns the
//! evaluator pool, and dispatches every `Activity` onto the scheduler (or
//! client bookkeeping) it concerns.

use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use ed25519_dalek::{SigningKey, VerifyingKey};

use pah_wire::envelope::{ServerToClient, UpdateBody};

use crate::activity::{Activity, ClientToken, IoMessage, PermHandle};
use crate::evaluator::EvaluatorProcess;
use crate::scheduler::Scheduler;
use crate::session::ClientSession;

/// Configuration for one running host.
pub struct ServerConfig {
    pub bind_addr: String,
    /// Command used to launch one evaluator subprocess (already wrapped in
    /// whatever sandbox invocation the operator wants).
    pub evaluator_command: String,
    pub evaluator_args: Vec<String>,
    /// Number of evaluator subprocesses to run, typically one per core.
    pub num_evaluators: usize,
    pub authorized_client_keys: Vec<VerifyingKey>,
    /// Sessions advertising a lower `network_priority` than this are
    /// rejected at handshake time.
    pub min_priority: f64,
    /// How long to wait for activity before announcing `IoMessage::WillSleep`.
    pub idle_announce_after: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5678".to_string(),
            evaluator_command: String::new(),
            evaluator_args: Vec::new(),
            num_evaluators: 1,
            authorized_client_keys: Vec::new(),
            min_priority: pah_wire::envelope::MIN_PRIORITY,
            idle_announce_after: Duration::from_secs(30),
        }
    }
}

struct ClientEntry {
    session: ClientSession,
    nickname: String,
}

/// The evaluator host.
pub struct Server {
    config: ServerConfig,
    identity: Arc<SigningKey>,
    activity_tx: Sender<Activity>,
    activity_rx: Receiver<Activity>,
}

impl Server {
    pub fn new(config: ServerConfig, identity: SigningKey) -> Self {
        let (activity_tx, activity_rx) = crossbeam_channel::unbounded();
        Self { config, identity: Arc::new(identity), activity_tx, activity_rx }
    }

    /// A sender that injects an `Activity` into the running (or
    /// about-to-run) main loop — used by a Ctrl+C handler to request
    /// [`Activity::Shutdown`] from outside.
    pub fn activity_handle(&self) -> Sender<Activity> {
        self.activity_tx.clone()
    }

    /// Run until an `Activity::Shutdown` arrives, blocking the calling
    /// thread. `io_tx` receives human-facing notifications for the caller
    /// to print or otherwise surface.
    pub fn run(self, io_tx: Sender<IoMessage>) -> io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)?;
        let activity_tx = self.activity_tx;
        let activity_rx = self.activity_rx;

        let mut evaluators = Vec::with_capacity(self.config.num_evaluators.max(1));
        for index in 0..self.config.num_evaluators.max(1) {
            let evaluator = EvaluatorProcess::spawn(
                index,
                &self.config.evaluator_command,
                &self.config.evaluator_args,
                activity_tx.clone(),
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            evaluators.push(evaluator);
        }
        let mut schedulers: Vec<Scheduler> = (0..evaluators.len()).map(|_| Scheduler::new()).collect();

        let next_token = Arc::new(AtomicU64::new(0));
        let authorized = Arc::new(self.config.authorized_client_keys.clone());
        let identity = Arc::clone(&self.identity);
        let min_priority = self.config.min_priority;
        let acceptor_activity_tx = activity_tx.clone();
        let (accepted_tx, accepted_rx): (Sender<(ClientToken, ClientSession, String)>, _) =
            crossbeam_channel::unbounded();

        std::thread::spawn(move || {
            accept_loop(
                listener,
                identity,
                authorized,
                min_priority,
                next_token,
                acceptor_activity_tx,
                accepted_tx,
            )
        });

        let mut clients: HashMap<ClientToken, ClientEntry> = HashMap::new();
        let mut assignment: HashMap<PermHandle, usize> = HashMap::new();
        let idle_timeout = self.config.idle_announce_after;

        loop {
            crossbeam_channel::select! {
                recv(accepted_rx) -> msg => {
                    let Ok((token, session, nickname)) = msg else { continue };
                    let _ = io_tx.send(IoMessage::ClientConnect { nickname: nickname.clone() });
                    clients.insert(token, ClientEntry { session, nickname });
                }
                recv(activity_rx) -> msg => {
                    let Ok(activity) = msg else { break };
                    if matches!(activity, Activity::Shutdown) {
                        let _ = io_tx.send(IoMessage::Shutdown);
                        break;
                    }
                    handle_activity(
                        activity,
                        &mut clients,
                        &mut evaluators,
                        &mut schedulers,
                        &mut assignment,
                        &io_tx,
                    );
                }
                default(idle_timeout) => {
                    if clients.is_empty() {
                        let _ = io_tx.send(IoMessage::WillSleep);
                    }
                }
            }
        }

        for entry in clients.into_values() {
            entry.session.join();
        }
        for evaluator in evaluators {
            evaluator.kill_and_join();
        }

        Ok(())
    }
}

fn accept_loop(
    listener: TcpListener,
    identity: Arc<SigningKey>,
    authorized: Arc<Vec<VerifyingKey>>,
    min_priority: f64,
    next_token: Arc<AtomicU64>,
    activity_tx: Sender<Activity>,
    accepted_tx: Sender<(ClientToken, ClientSession, String)>,
) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        let token = ClientToken(next_token.fetch_add(1, Ordering::Relaxed));
        match ClientSession::accept(
            stream,
            identity.as_ref(),
            authorized.as_slice(),
            min_priority,
            token,
            activity_tx.clone(),
        ) {
            Ok((session, nickname)) => {
                let _ = activity_tx.send(Activity::ClientConnected { client: token, nickname: nickname.clone() });
                if accepted_tx.send((token, session, nickname)).is_err() {
                    return;
                }
            }
            Err(_) => continue,
        }
    }
}

fn handle_activity(
    activity: Activity,
    clients: &mut HashMap<ClientToken, ClientEntry>,
    evaluators: &mut [EvaluatorProcess],
    schedulers: &mut [Scheduler],
    assignment: &mut HashMap<PermHandle, usize>,
    io_tx: &Sender<IoMessage>,
) {
    match activity {
        Activity::ClientConnected { .. } => {}
        Activity::ClientDisconnected { client, reason } => {
            if let Some(entry) = clients.remove(&client) {
                let _ = io_tx.send(IoMessage::ClientDisconnect { nickname: entry.nickname, reason });
                entry.session.join();
            }
            for (idx, scheduler) in schedulers.iter_mut().enumerate() {
                for handle in scheduler.remove_client(client) {
                    assignment.remove(&handle);
                    let _ = evaluators[idx].send(&pah_wire::envelope::ServerToEvaluator::Remove { id: handle.0 });
                }
            }
        }
        Activity::AddPermuter { client, client_permuter, data, source, target_o_bin } => {
            let evaluator_idx = least_loaded_evaluator(evaluators.len(), assignment);
            match schedulers[evaluator_idx].register(client, client_permuter) {
                Ok(handle) => {
                    assignment.insert(handle, evaluator_idx);
                    if evaluators[evaluator_idx].send_add(handle.0, data, &source, &target_o_bin).is_err() {
                        if let Some(entry) = clients.get(&client) {
                            entry.session.send(ServerToClient::Update {
                                permuter: client_permuter,
                                time_us: 0,
                                update: UpdateBody::InitFailed {
                                    reason: "evaluator pipe closed".to_string(),
                                },
                            });
                        }
                    }
                }
                Err(err) => {
                    if let Some(entry) = clients.get(&client) {
                        entry.session.send(ServerToClient::Update {
                            permuter: client_permuter,
                            time_us: 0,
                            update: UpdateBody::InitFailed { reason: err.to_string() },
                        });
                    }
                }
            }
        }
        Activity::RemovePermuter { client, client_permuter } => {
            for (idx, scheduler) in schedulers.iter_mut().enumerate() {
                if let Some(handle) = scheduler.unregister(client, client_permuter) {
                    assignment.remove(&handle);
                    let _ = evaluators[idx].send(&pah_wire::envelope::ServerToEvaluator::Remove { id: handle.0 });
                    break;
                }
            }
        }
        Activity::WorkRequest { client, client_permuter, seed } => {
            match schedulers
                .iter()
                .enumerate()
                .find_map(|(idx, s)| s.find(client, client_permuter).map(|h| (idx, h)))
            {
                Some((idx, handle)) => {
                    schedulers[idx].enqueue(handle, seed);
                }
                None => {
                    // Handle isn't active (e.g. this Work raced a Remove) —
                    // don't starve the client, just ask it for other work.
                    if let Some(entry) = clients.get(&client) {
                        entry.session.send(ServerToClient::NeedWork);
                    }
                }
            }
        }
        Activity::Heartbeat { .. } => {}
        Activity::EvaluatorInitResult { handle, time_us, success, base_score, base_hash, error } => {
            if let Some(idx) = assignment.get(&handle) {
                if let Some((client, client_permuter)) = schedulers[*idx].owner(handle) {
                    if let Some(entry) = clients.get(&client) {
                        let update = if success {
                            UpdateBody::InitDone {
                                base_score: base_score.unwrap_or(0),
                                base_hash: base_hash.unwrap_or_default(),
                            }
                        } else {
                            UpdateBody::InitFailed { reason: error.unwrap_or_default() }
                        };
                        entry.session.send(ServerToClient::Update { permuter: client_permuter, time_us, update });
                    }
                }
            }
        }
        Activity::EvaluatorWorkResult {
            handle, seed, time_us, success, score, hash, error, has_source, source,
        } => {
            if let Some(idx) = assignment.get(&handle) {
                if let Some((client, client_permuter)) = schedulers[*idx].owner(handle) {
                    if let Some(entry) = clients.get(&client) {
                        let update = UpdateBody::Work {
                            keep_flag: seed.keep_flag,
                            rng_seed: seed.rng_seed,
                            success,
                            score,
                            hash,
                            error,
                            has_source,
                        };
                        let msg = ServerToClient::Update { permuter: client_permuter, time_us, update };
                        match source {
                            Some(text) => entry.session.send_with_source(msg, text.into_bytes()),
                            None => entry.session.send(msg),
                        }
                    }
                }
            }
        }
        Activity::EvaluatorNeedWork { evaluator } => {
            if let Some(scheduler) = schedulers.get_mut(evaluator) {
                match scheduler.next_work() {
                    Some((handle, seed)) => {
                        let _ = evaluators[evaluator]
                            .send(&pah_wire::envelope::ServerToEvaluator::work(handle.0, seed));
                    }
                    None => {
                        for client in scheduler.registered_clients() {
                            if let Some(entry) = clients.get(&client) {
                                entry.session.send(ServerToClient::NeedWork);
                            }
                        }
                    }
                }
            }
        }
        Activity::EvaluatorDisconnected { evaluator, reason } => {
            let _ = io_tx.send(IoMessage::ClientDisconnect {
                nickname: format!("evaluator[{evaluator}]"),
                reason: Some(reason),
            });
        }
        Activity::Shutdown => {}
    }
}

/// Assign a newly added permuter to whichever evaluator currently holds the
/// fewest registered permuters, spreading load across the pool.
fn least_loaded_evaluator(num_evaluators: usize, assignment: &HashMap<PermHandle, usize>) -> usize {
    let mut counts = vec![0usize; num_evaluators.max(1)];
    for &idx in assignment.values() {
        if let Some(count) = counts.get_mut(idx) {
            *count += 1;
        }
    }
    counts
        .iter()
        .enumerate()
        .min_by_key(|(_, count)| **count)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}
