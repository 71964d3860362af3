#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Encrypted, framed, multi-client wire transport.
//!
//! Layering, bottom to top:
//! - [`frame`]: length-prefixed opaque byte frames over any `Read + Write`.
//! - [`crypto`]: the handshake (signed ephemeral X25519 key exchange over
//!   long-term Ed25519 identities) and the resulting authenticated-encryption
//!   session (`EncryptedSession`), which frames are encrypted under.
//! - [`compress`]: zlib compression for the (large) source/object-file raw
//!   frames.
//! - [`envelope`]: the JSON message shapes exchanged between coordinator and
//!   server, and between server and evaluator.
//! - [`docker`]: demultiplexing of a Docker attach-socket's 8-byte-header
//!   stdout/stderr stream, for when the evaluator sandbox runs as a
//!   container.

pub mod compress;
pub mod crypto;
pub mod docker;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod port;

pub use error::WireError;
pub use port::Port;
