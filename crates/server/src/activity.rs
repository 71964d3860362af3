//! The tagged union the server's single-threaded main loop dispatches on —
//! every client session thread and every evaluator subprocess thread
//! funnels its events through one `Activity` channel, the same
//! `Activity`/`Output`/`IoMessage` taxonomy a single-threaded event-sourced
//! server commonly dispatches on.

use pah_core::seed::SeedTuple;
use pah_core::wire_data::PermuterDataFields;

/// Identifies one connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientToken(pub u64);

/// Identifies one permuter registered with an evaluator, server-side. This
/// is distinct from the client's own local `permuter` index: several
/// clients' permuter `0` may all be registered as different `PermHandle`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermHandle(pub u64);

/// One event flowing into the server's main loop.
#[derive(Debug)]
pub enum Activity {
    /// A new client connection has completed its handshake.
    ClientConnected { client: ClientToken, nickname: String },
    /// A client session's reader/writer threads have exited.
    ClientDisconnected { client: ClientToken, reason: Option<String> },
    /// A client wants to register a new permuter.
    AddPermuter {
        client: ClientToken,
        client_permuter: usize,
        data: PermuterDataFields,
        source: Vec<u8>,
        target_o_bin: Vec<u8>,
    },
    /// A client is dropping one of its permuters.
    RemovePermuter { client: ClientToken, client_permuter: usize },
    /// A client is requesting evaluation of one seed.
    WorkRequest { client: ClientToken, client_permuter: usize, seed: SeedTuple },
    /// A client's keep-alive.
    Heartbeat { client: ClientToken },
    /// The evaluator finished initializing a newly added permuter.
    EvaluatorInitResult {
        handle: PermHandle,
        time_us: u64,
        success: bool,
        base_score: Option<i64>,
        base_hash: Option<String>,
        error: Option<String>,
    },
    /// The evaluator finished evaluating one seed.
    EvaluatorWorkResult {
        handle: PermHandle,
        seed: SeedTuple,
        time_us: u64,
        success: bool,
        score: Option<i64>,
        hash: Option<String>,
        error: Option<String>,
        has_source: bool,
        source: Option<String>,
    },
    /// The evaluator has spare capacity.
    EvaluatorNeedWork { evaluator: usize },
    /// The evaluator subprocess died or its pipe closed.
    EvaluatorDisconnected { evaluator: usize, reason: String },
    /// Operator-requested shutdown (e.g. Ctrl+C on `pah-serverd`).
    Shutdown,
}

/// Local, human-facing notifications (console output, and eventually a
/// systray icon) distinct from anything sent back over the wire.
#[derive(Debug, Clone)]
pub enum IoMessage {
    /// A client connected.
    ClientConnect { nickname: String },
    /// A client disconnected, with an optional reason.
    ClientDisconnect { nickname: String, reason: Option<String> },
    /// The server has no clients and no pending work: about to block.
    WillSleep,
    /// The server is shutting down.
    Shutdown,
}
