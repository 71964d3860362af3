//! The unifying transport handle used by both the coordinator and the
//! server: an encrypted, framed duplex connection plus convenience methods
//! for the JSON envelope messages and the raw compressed blob frames that
//! follow an `add` message. Analogous to the reference design's
//! `Port` / `SocketPort` / `DockerPort` class hierarchy — `Duplex` below
//! plays the role `DockerPort` played there, letting a demultiplexed
//! container stdout and a plain stdin writer present as one `Read + Write`.

use std::io::{self, Read, Write};

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::compress;
use crate::crypto::EncryptedSession;
use crate::error::WireError;

/// Glues a separate reader and writer half into a single `Read + Write`
/// value, for transports (like a Docker attach socket) where the two
/// directions are handled differently.
pub struct Duplex<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R, W> Duplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read, W> Read for Duplex<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R, W: Write> Write for Duplex<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// An authenticated, encrypted, framed connection, with convenience methods
/// layered on top of [`EncryptedSession`] for the message shapes in
/// [`crate::envelope`].
pub struct Port<S> {
    session: EncryptedSession<S>,
}

impl<S: Read + Write> Port<S> {
    /// Complete the client side of the handshake and wrap the result.
    pub fn connect(
        stream: S,
        identity: &SigningKey,
        authorized_peer_keys: &[VerifyingKey],
    ) -> Result<Self, WireError> {
        Ok(Self {
            session: EncryptedSession::client_handshake(stream, identity, authorized_peer_keys)?,
        })
    }

    /// Complete the server side of the handshake and wrap the result.
    pub fn accept(
        stream: S,
        identity: &SigningKey,
        authorized_peer_keys: &[VerifyingKey],
    ) -> Result<Self, WireError> {
        Ok(Self {
            session: EncryptedSession::server_handshake(stream, identity, authorized_peer_keys)?,
        })
    }

    /// The verified long-term identity of the peer on the other end.
    pub fn peer_identity(&self) -> &VerifyingKey {
        &self.session.peer_identity
    }

    /// Send a JSON envelope message.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        self.session.send_json(value)
    }

    /// Receive and decode a JSON envelope message.
    pub fn recv_json<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T, WireError> {
        self.session.recv_json()
    }

    /// Send a raw (uncompressed) blob frame, e.g. a small ancillary payload.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.session.send(bytes)
    }

    /// Receive a raw (uncompressed) blob frame.
    pub fn recv_raw(&mut self) -> Result<Vec<u8>, WireError> {
        self.session.recv()
    }

    /// Send a zlib-compressed blob frame (source text, object file bytes).
    pub fn send_compressed(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.session.send(&compress::compress(bytes))
    }

    /// Receive and decompress a blob frame produced by [`Port::send_compressed`].
    pub fn recv_compressed(&mut self) -> Result<Vec<u8>, WireError> {
        let compressed = self.session.recv()?;
        compress::decompress(&compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn sends_json_and_compressed_blob_together() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_sock = TcpStream::connect(addr).unwrap();
        let (server_sock, _) = listener.accept().unwrap();

        let client_identity = SigningKey::generate(&mut OsRng);
        let server_identity = SigningKey::generate(&mut OsRng);

        let server_thread = std::thread::spawn(move || {
            let mut port = Port::accept(server_sock, &server_identity, &[]).unwrap();
            let msg: serde_json::Value = port.recv_json().unwrap();
            let blob = port.recv_compressed().unwrap();
            (msg, blob)
        });

        let mut client_port = Port::connect(client_sock, &client_identity, &[]).unwrap();
        client_port
            .send_json(&serde_json::json!({"type": "add", "permuter": 0}))
            .unwrap();
        let source = b"int func(void) { return 0; }".repeat(20);
        client_port.send_compressed(&source).unwrap();

        let (msg, blob) = server_thread.join().unwrap();
        assert_eq!(msg["permuter"], 0);
        assert_eq!(blob, source);
    }
}
