//! JSON message shapes exchanged over the wire.
//!
//! There are two distinct protocols layered on the same framing and
//! encryption: coordinator-session <-> server (`ClientToServer` /
//! `ServerToClient`), and server <-> evaluator subprocess (`ServerToEvaluator`
//! / `EvaluatorToServer`). Both are internally tagged JSON enums so that a
//! malformed or unrecognized `"type"` field fails cleanly at the edge rather
//! than deep in the handler logic.

use serde::{Deserialize, Serialize};

use pah_core::seed::SeedTuple;
use pah_core::wire_data::PermuterDataFields;

/// Lower bound of the `--priority` range a coordinator may advertise.
pub const MIN_PRIORITY: f64 = 0.0;
/// Upper bound of the `--priority` range a coordinator may advertise.
pub const MAX_PRIORITY: f64 = 2.0;

fn seed_as_parts(seed: SeedTuple) -> (u64, u64) {
    (seed.keep_flag, seed.rng_seed)
}

fn seed_from_parts(keep_flag: u64, rng_seed: u64) -> SeedTuple {
    SeedTuple { keep_flag, rng_seed }
}

/// A message sent from a coordinator session to a remote server. `Add` is
/// always immediately followed by two raw (possibly zlib-compressed) frames
/// carrying `source` and `target_o_bin`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    /// The first message on every session: advertises this coordinator's
    /// `network_priority` (bounded by [`MIN_PRIORITY`]/[`MAX_PRIORITY`]) so
    /// the server can reject or deprioritize it against its own
    /// `min_priority` threshold before any permuter is added.
    Hello { priority: f64 },
    /// Keep-alive; the server replies with nothing but resets its timeout.
    Heartbeat,
    /// Register a new permuter. `permuter` is this session's local index for
    /// it; `client_id`/`client_name` identify the coordinator for display.
    Add {
        permuter: usize,
        client_id: String,
        client_name: String,
        #[serde(flatten)]
        data: PermuterDataFields,
    },
    /// Request evaluation of one seed against an already-added permuter.
    Work {
        permuter: usize,
        #[serde(rename = "seed_keep")]
        keep_flag: u64,
        #[serde(rename = "seed_rng")]
        rng_seed: u64,
    },
    /// Drop a previously added permuter; the server stops scheduling work for it.
    Remove { permuter: usize },
}

impl ClientToServer {
    /// Convenience constructor for [`ClientToServer::Work`] from a [`SeedTuple`].
    pub fn work(permuter: usize, seed: SeedTuple) -> Self {
        let (keep_flag, rng_seed) = seed_as_parts(seed);
        ClientToServer::Work { permuter, keep_flag, rng_seed }
    }
}

/// The body of a [`ServerToClient::Update`] message: one of the four
/// lifecycle events the reference design's `NetThread` reports for a permuter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateBody {
    /// The permuter failed to initialize on this server (bad compile script,
    /// scorer crash on the base source, etc).
    InitFailed { reason: String },
    /// The permuter initialized and its base score/hash are known.
    InitDone { base_score: i64, base_hash: String },
    /// The server is dropping this permuter (e.g. it hit its own error cap).
    Disconnect { reason: Option<String> },
    /// One seed finished evaluating.
    Work {
        #[serde(rename = "seed_keep")]
        keep_flag: u64,
        #[serde(rename = "seed_rng")]
        rng_seed: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        score: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
        has_source: bool,
    },
}

impl UpdateBody {
    /// Recover the `SeedTuple` for a `Work` update, if this is one.
    pub fn seed(&self) -> Option<SeedTuple> {
        match self {
            UpdateBody::Work { keep_flag, rng_seed, .. } => {
                Some(seed_from_parts(*keep_flag, *rng_seed))
            }
            _ => None,
        }
    }
}

/// A message sent from a remote server back to a coordinator session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    /// An update about one of this session's permuters, with the time spent
    /// on the server side (microseconds), for `--show-timings`.
    Update { permuter: usize, time_us: u64, update: UpdateBody },
    /// This server has no more queued work for this session; send more.
    NeedWork,
}

/// A message from the server's main loop to one evaluator subprocess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToEvaluator {
    /// Register a permuter with the evaluator, identified by `id` (the
    /// server's own handle, distinct from the client's `permuter` index).
    Add {
        id: u64,
        #[serde(flatten)]
        data: PermuterDataFields,
    },
    /// Evaluate one seed.
    Work {
        id: u64,
        #[serde(rename = "seed_keep")]
        keep_flag: u64,
        #[serde(rename = "seed_rng")]
        rng_seed: u64,
    },
    /// Drop a permuter from the evaluator.
    Remove { id: u64 },
}

impl ServerToEvaluator {
    /// Convenience constructor for [`ServerToEvaluator::Work`] from a [`SeedTuple`].
    pub fn work(id: u64, seed: SeedTuple) -> Self {
        let (keep_flag, rng_seed) = seed_as_parts(seed);
        ServerToEvaluator::Work { id, keep_flag, rng_seed }
    }
}

/// A message from an evaluator subprocess back to the server's main loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluatorToServer {
    /// Result of initializing a newly added permuter (scoring the unmodified
    /// base source against the target object).
    Init {
        id: u64,
        time_us: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        base_score: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        base_hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    /// Result of evaluating one seed.
    Result {
        id: u64,
        time_us: u64,
        #[serde(rename = "seed_keep")]
        keep_flag: u64,
        #[serde(rename = "seed_rng")]
        rng_seed: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        score: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
        has_source: bool,
    },
    /// This evaluator is idle; the server may schedule more work onto it.
    NeedWork,
}

impl EvaluatorToServer {
    /// Recover the `SeedTuple` for a `Result` message.
    pub fn seed(&self) -> Option<SeedTuple> {
        match self {
            EvaluatorToServer::Result { keep_flag, rng_seed, .. } => {
                Some(seed_from_parts(*keep_flag, *rng_seed))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_to_server_add_tags_and_flattens() {
        let msg = ClientToServer::Add {
            permuter: 0,
            client_id: "abc123".to_string(),
            client_name: "alice".to_string(),
            data: PermuterDataFields {
                fn_name: Some("func_80012345".to_string()),
                filename: "base.c".to_string(),
                keep_prob: "0.6".to_string(),
                stack_differences: false,
                compile_script: "#!/bin/sh\n".to_string(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "add");
        assert_eq!(json["filename"], "base.c");
        let round_tripped: ClientToServer = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped, msg);
    }

    #[test]
    fn work_message_round_trips_seed() {
        let seed = SeedTuple { keep_flag: 7, rng_seed: 42 };
        let msg = ClientToServer::work(3, seed);
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientToServer = serde_json::from_str(&json).unwrap();
        match back {
            ClientToServer::Work { permuter, keep_flag, rng_seed } => {
                assert_eq!(permuter, 3);
                assert_eq!(seed_from_parts(keep_flag, rng_seed), seed);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn update_body_work_recovers_seed() {
        let update = UpdateBody::Work {
            keep_flag: 0,
            rng_seed: 99,
            success: true,
            score: Some(0),
            hash: Some("deadbeef".to_string()),
            error: None,
            has_source: true,
        };
        assert_eq!(update.seed(), Some(SeedTuple::fresh(99)));
    }

    #[test]
    fn unrecognized_type_tag_fails_to_parse() {
        let json = serde_json::json!({"type": "not_a_real_variant"});
        let result: Result<ClientToServer, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn evaluator_init_failure_has_no_score() {
        let msg = EvaluatorToServer::Init {
            id: 1,
            time_us: 1500,
            success: false,
            base_score: None,
            base_hash: None,
            error: Some("compile.sh exited 1".to_string()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("base_score").is_none());
        assert_eq!(json["error"], "compile.sh exited 1");
    }
}
