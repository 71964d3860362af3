//! One client connection: a dedicated thread owns the encrypted port,
//! translating incoming `ClientToServer` messages into `Activity` events
//! for the main loop and draining queued `ServerToClient` replies before
//! blocking on the next read.

use std::net::TcpStream;
use std::thread::JoinHandle;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use crossbeam_channel::{Receiver, Sender};
use ed25519_dalek::{SigningKey, VerifyingKey};

use pah_wire::envelope::{ClientToServer, ServerToClient};
use pah_wire::Port;

use crate::activity::{Activity, ClientToken};

/// One queued outgoing item: a JSON update, or a raw compressed blob that
/// must follow the update announcing it (the winning candidate's source,
/// same convention as a client's own `Add`).
pub enum Outbound {
    Update(ServerToClient),
    Source(Vec<u8>),
}

/// A running client session.
pub struct ClientSession {
    handle: JoinHandle<()>,
    out_tx: Sender<Outbound>,
}

impl ClientSession {
    /// Complete the server side of the handshake on an accepted `stream`
    /// and start this session's thread. `token` is how the main loop will
    /// refer to this client in `Activity` events.
    pub fn accept(
        stream: TcpStream,
        identity: &SigningKey,
        authorized_client_keys: &[VerifyingKey],
        min_priority: f64,
        token: ClientToken,
        activity_tx: Sender<Activity>,
    ) -> Result<(Self, String), std::io::Error> {
        stream.set_nodelay(true)?;
        let mut port = Port::accept(stream, identity, authorized_client_keys)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let nickname = B64.encode(port.peer_identity().as_bytes());

        let priority = match port.recv_json::<ClientToServer>() {
            Ok(ClientToServer::Hello { priority }) => priority,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "session did not open with a Hello",
                ))
            }
        };
        if priority < min_priority {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("priority {priority} below this host's minimum {min_priority}"),
            ));
        }

        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let handle = std::thread::spawn(move || session_loop(port, token, out_rx, activity_tx));
        Ok((Self { handle, out_tx }, nickname))
    }

    /// Queue a reply to send to this client.
    pub fn send(&self, msg: ServerToClient) {
        let _ = self.out_tx.send(Outbound::Update(msg));
    }

    /// Queue a reply together with the raw candidate-source frame that must
    /// immediately follow it.
    pub fn send_with_source(&self, msg: ServerToClient, source: Vec<u8>) {
        let _ = self.out_tx.send(Outbound::Update(msg));
        let _ = self.out_tx.send(Outbound::Source(source));
    }

    /// Wait for this session's thread to exit (after its connection drops).
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn session_loop(
    mut port: Port<TcpStream>,
    token: ClientToken,
    out_rx: Receiver<Outbound>,
    activity_tx: Sender<Activity>,
) {
    loop {
        loop {
            match out_rx.try_recv() {
                Ok(Outbound::Update(msg)) => {
                    if port.send_json(&msg).is_err() {
                        let _ = activity_tx.send(Activity::ClientDisconnected {
                            client: token,
                            reason: Some("write failed".to_string()),
                        });
                        return;
                    }
                }
                Ok(Outbound::Source(bytes)) => {
                    if port.send_compressed(&bytes).is_err() {
                        let _ = activity_tx.send(Activity::ClientDisconnected {
                            client: token,
                            reason: Some("write failed".to_string()),
                        });
                        return;
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }
        }

        match port.recv_json::<ClientToServer>() {
            Ok(ClientToServer::Hello { .. }) => {
                // Only valid as the very first message, consumed in `accept`.
                let _ = activity_tx.send(Activity::ClientDisconnected {
                    client: token,
                    reason: Some("unexpected Hello after session start".to_string()),
                });
                return;
            }
            Ok(ClientToServer::Heartbeat) => {
                let _ = activity_tx.send(Activity::Heartbeat { client: token });
            }
            Ok(ClientToServer::Add { permuter, data, .. }) => {
                // `Add` is always immediately followed by the source and
                // target-object raw frames (pah_wire::port convention).
                let source = match port.recv_compressed() {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                };
                let target_o_bin = match port.recv_compressed() {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                };
                let _ = activity_tx.send(Activity::AddPermuter {
                    client: token,
                    client_permuter: permuter,
                    data,
                    source,
                    target_o_bin,
                });
            }
            Ok(ClientToServer::Work { permuter, keep_flag, rng_seed }) => {
                let _ = activity_tx.send(Activity::WorkRequest {
                    client: token,
                    client_permuter: permuter,
                    seed: pah_core::seed::SeedTuple { keep_flag, rng_seed },
                });
            }
            Ok(ClientToServer::Remove { permuter }) => {
                let _ = activity_tx.send(Activity::RemovePermuter {
                    client: token,
                    client_permuter: permuter,
                });
            }
            Err(err) => {
                let reason = (!err.is_eof()).then(|| err.to_string());
                let _ = activity_tx.send(Activity::ClientDisconnected { client: token, reason });
                return;
            }
        }
    }
}
