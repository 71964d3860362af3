//! Handshake and authenticated-encryption session.
//!
//! Each endpoint has a long-term Ed25519 signing identity
//! ([`pah_core::identity::SigningIdentity`]). On connect, each side
//! generates an ephemeral X25519 key pair, signs its public half with its
//! long-term key, and sends `(identity_pub, eph_pub, signature)` in a
//! single plaintext frame. After both sides have verified the peer's
//! signature (and, for the server, checked the client's identity against
//! its authorized set), both derive a shared symmetric key via X25519
//! Diffie-Hellman and switch to an [`EncryptedSession`] — the Rust
//! equivalent of PyNaCl's ephemeral `Box` handshake followed by a
//! `SecretBox` session, using XChaCha20-Poly1305 (24-byte nonces) in place
//! of libsodium's `crypto_secretbox`.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use x25519_dalek::{EphemeralSecret, PublicKey as XPublicKey};

use crate::error::WireError;
use crate::frame::{read_frame, write_frame};

/// Domain separation string mixed into the shared-secret key derivation, so
/// this protocol's session keys can never collide with another use of the
/// same X25519 shared secret.
const KDF_CONTEXT: &[u8] = b"pah-wire-v1-session-key";

#[derive(Debug, Serialize, Deserialize)]
struct HelloMessage {
    identity_pub: String,
    eph_pub: String,
    signature: String,
}

fn sign_and_encode_hello(identity: &SigningKey, eph_pub: &XPublicKey) -> HelloMessage {
    let eph_pub_bytes = eph_pub.as_bytes();
    let signature: Signature = identity.sign(eph_pub_bytes);
    HelloMessage {
        identity_pub: B64.encode(identity.verifying_key().as_bytes()),
        eph_pub: B64.encode(eph_pub_bytes),
        signature: B64.encode(signature.to_bytes()),
    }
}

fn decode_and_verify_hello(hello: &HelloMessage) -> Result<(VerifyingKey, XPublicKey), WireError> {
    let identity_pub_bytes = B64
        .decode(&hello.identity_pub)
        .map_err(|e| WireError::Malformed(format!("bad identity_pub: {e}")))?;
    let identity_pub_arr: [u8; 32] = identity_pub_bytes
        .try_into()
        .map_err(|_| WireError::Malformed("identity_pub must be 32 bytes".to_string()))?;
    let identity_pub = VerifyingKey::from_bytes(&identity_pub_arr)
        .map_err(|e| WireError::AuthFailed(format!("invalid identity key: {e}")))?;

    let eph_pub_bytes = B64
        .decode(&hello.eph_pub)
        .map_err(|e| WireError::Malformed(format!("bad eph_pub: {e}")))?;
    let eph_pub_arr: [u8; 32] = eph_pub_bytes
        .try_into()
        .map_err(|_| WireError::Malformed("eph_pub must be 32 bytes".to_string()))?;

    let signature_bytes = B64
        .decode(&hello.signature)
        .map_err(|e| WireError::Malformed(format!("bad signature: {e}")))?;
    let signature_arr: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| WireError::Malformed("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&signature_arr);

    identity_pub
        .verify(&eph_pub_arr, &signature)
        .map_err(|_| WireError::AuthFailed("ephemeral key signature did not verify".to_string()))?;

    Ok((identity_pub, XPublicKey::from(eph_pub_arr)))
}

fn derive_key(shared: &x25519_dalek::SharedSecret) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    hasher.update(KDF_CONTEXT);
    let digest = hasher.finalize();
    *Key::from_slice(&digest)
}

/// Direction tag mixed into the nonce so that the two peers' independent
/// counters can never produce the same nonce under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::ClientToServer => 1,
            Direction::ServerToClient => 2,
        }
    }

    fn other(self) -> Self {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }
}

fn build_nonce(direction: Direction, counter: u64) -> XNonce {
    let mut bytes = [0u8; 24];
    bytes[0] = direction.tag();
    bytes[1..9].copy_from_slice(&counter.to_be_bytes());
    *XNonce::from_slice(&bytes)
}

/// An encrypted, framed duplex session over any `Read + Write` transport
/// (typically a `TcpStream`, or a subprocess's stdio pipes).
pub struct EncryptedSession<S> {
    stream: S,
    cipher: XChaCha20Poly1305,
    send_direction: Direction,
    send_counter: u64,
    recv_direction: Direction,
    recv_counter: u64,
    /// The verified long-term identity of the peer.
    pub peer_identity: VerifyingKey,
}

impl<S: Read + Write> EncryptedSession<S> {
    /// Perform the client side of the handshake: send our signed ephemeral
    /// key first, then read and verify the server's.
    ///
    /// `authorized_server_keys`, when non-empty, restricts which server
    /// identities we'll accept (pinned from the directory service's signed
    /// server list); an empty slice accepts any signature-valid server
    /// (used in tests).
    pub fn client_handshake(
        mut stream: S,
        identity: &SigningKey,
        authorized_server_keys: &[VerifyingKey],
    ) -> Result<Self, WireError> {
        let eph_secret = EphemeralSecret::random_from_rng(OsRng);
        let eph_pub = XPublicKey::from(&eph_secret);

        let hello = sign_and_encode_hello(identity, &eph_pub);
        write_frame(&mut stream, &serde_json::to_vec(&hello).unwrap())?;

        let reply_bytes = read_frame(&mut stream)?;
        let reply: HelloMessage = serde_json::from_slice(&reply_bytes)
            .map_err(|e| WireError::Malformed(format!("bad handshake reply: {e}")))?;
        let (peer_identity, their_eph_pub) = decode_and_verify_hello(&reply)?;

        if !authorized_server_keys.is_empty()
            && !authorized_server_keys.contains(&peer_identity)
        {
            return Err(WireError::AuthFailed(
                "server identity not in authorized set".to_string(),
            ));
        }

        let shared = eph_secret.diffie_hellman(&their_eph_pub);
        let cipher = XChaCha20Poly1305::new(&derive_key(&shared));

        Ok(Self {
            stream,
            cipher,
            send_direction: Direction::ClientToServer,
            send_counter: 0,
            recv_direction: Direction::ServerToClient,
            recv_counter: 0,
            peer_identity,
        })
    }

    /// Perform the server side of the handshake: read the client's signed
    /// ephemeral key first, check it against `authorized_client_keys`, then
    /// reply with our own.
    pub fn server_handshake(
        mut stream: S,
        identity: &SigningKey,
        authorized_client_keys: &[VerifyingKey],
    ) -> Result<Self, WireError> {
        let hello_bytes = read_frame(&mut stream)?;
        let hello: HelloMessage = serde_json::from_slice(&hello_bytes)
            .map_err(|e| WireError::Malformed(format!("bad handshake hello: {e}")))?;
        let (peer_identity, their_eph_pub) = decode_and_verify_hello(&hello)?;

        if !authorized_client_keys.is_empty()
            && !authorized_client_keys.contains(&peer_identity)
        {
            return Err(WireError::AuthFailed(
                "client identity not authorized".to_string(),
            ));
        }

        let eph_secret = EphemeralSecret::random_from_rng(OsRng);
        let eph_pub = XPublicKey::from(&eph_secret);
        let reply = sign_and_encode_hello(identity, &eph_pub);
        write_frame(&mut stream, &serde_json::to_vec(&reply).unwrap())?;

        let shared = eph_secret.diffie_hellman(&their_eph_pub);
        let cipher = XChaCha20Poly1305::new(&derive_key(&shared));

        Ok(Self {
            stream,
            cipher,
            send_direction: Direction::ServerToClient,
            send_counter: 0,
            recv_direction: Direction::ClientToServer,
            recv_counter: 0,
            peer_identity,
        })
    }

    /// Encrypt and send one opaque frame.
    pub fn send(&mut self, plaintext: &[u8]) -> Result<(), WireError> {
        let nonce = build_nonce(self.send_direction, self.send_counter);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| WireError::Framing("encryption failed".to_string()))?;
        write_frame(&mut self.stream, &ciphertext)?;
        self.send_counter = self
            .send_counter
            .checked_add(1)
            .ok_or_else(|| WireError::Framing("nonce space exhausted".to_string()))?;
        Ok(())
    }

    /// Receive and decrypt one opaque frame. Any authentication failure
    /// (including a single bit flip anywhere in the ciphertext) is reported
    /// as [`WireError::DecryptionFailed`]; the caller must close the
    /// session rather than retry.
    pub fn recv(&mut self) -> Result<Vec<u8>, WireError> {
        let ciphertext = read_frame(&mut self.stream)?;
        let nonce = build_nonce(self.recv_direction, self.recv_counter);
        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext.as_slice())
            .map_err(|_| WireError::DecryptionFailed)?;
        self.recv_counter = self
            .recv_counter
            .checked_add(1)
            .ok_or_else(|| WireError::Framing("nonce space exhausted".to_string()))?;
        Ok(plaintext)
    }

    /// Send a JSON-serializable message as one frame.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| WireError::Malformed(format!("failed to encode json: {e}")))?;
        self.send(&bytes)
    }

    /// Receive and deserialize one JSON frame.
    pub fn recv_json<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T, WireError> {
        let bytes = self.recv()?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WireError::Malformed(format!("failed to decode json: {e}")))
    }

    /// Split off the direction tag this session expects from its peer next,
    /// for tests that want to simulate the other side.
    #[cfg(test)]
    fn peer_direction(&self) -> Direction {
        self.send_direction.other()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn handshake_then_encrypted_roundtrip() {
        let (client_sock, server_sock) = connected_pair();
        let client_identity = SigningKey::generate(&mut OsRng);
        let server_identity = SigningKey::generate(&mut OsRng);

        let server_thread = std::thread::spawn(move || {
            let mut session =
                EncryptedSession::server_handshake(server_sock, &server_identity, &[]).unwrap();
            let msg: serde_json::Value = session.recv_json().unwrap();
            assert_eq!(msg["hello"], "world");
            session.send_json(&serde_json::json!({"ack": true})).unwrap();
            session
        });

        let mut client_session =
            EncryptedSession::client_handshake(client_sock, &client_identity, &[]).unwrap();
        client_session
            .send_json(&serde_json::json!({"hello": "world"}))
            .unwrap();
        let reply: serde_json::Value = client_session.recv_json().unwrap();
        assert_eq!(reply["ack"], true);

        let server_session = server_thread.join().unwrap();
        assert_eq!(server_session.peer_identity, client_identity.verifying_key());
        assert_eq!(client_session.peer_identity, server_identity.verifying_key());
        assert_eq!(client_session.peer_direction(), Direction::ServerToClient);
    }

    #[test]
    fn bit_flip_in_ciphertext_is_fatal() {
        let (client_sock, server_sock) = connected_pair();
        let client_identity = SigningKey::generate(&mut OsRng);
        let server_identity = SigningKey::generate(&mut OsRng);

        let server_thread = std::thread::spawn(move || {
            EncryptedSession::server_handshake(server_sock, &server_identity, &[]).unwrap()
        });
        let mut client_session =
            EncryptedSession::client_handshake(client_sock, &client_identity, &[]).unwrap();
        let _server_session = server_thread.join().unwrap();

        // Encrypt a frame, then flip one bit in the ciphertext before it
        // would be read back, by encrypting to a buffer directly.
        let nonce = build_nonce(client_session.send_direction, client_session.send_counter);
        let mut ciphertext = client_session
            .cipher
            .encrypt(&nonce, b"hello".as_slice())
            .unwrap();
        ciphertext[0] ^= 0x01;

        let result = client_session.cipher.decrypt(&nonce, ciphertext.as_slice());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unauthorized_client_identity() {
        let (client_sock, server_sock) = connected_pair();
        let client_identity = SigningKey::generate(&mut OsRng);
        let server_identity = SigningKey::generate(&mut OsRng);
        let other_identity = SigningKey::generate(&mut OsRng);

        let authorized = vec![other_identity.verifying_key()];
        let server_thread = std::thread::spawn(move || {
            EncryptedSession::server_handshake(server_sock, &server_identity, &authorized)
        });
        let _ = EncryptedSession::client_handshake(client_sock, &client_identity, &[]);
        let result = server_thread.join().unwrap();
        assert!(matches!(result, Err(WireError::AuthFailed(_))));
    }
}
