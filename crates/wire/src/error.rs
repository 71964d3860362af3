//! Error taxonomy for the wire layer.

/// Errors from framing, encryption, or protocol handling. All of these are
/// fatal to the session that produced them: the caller tears the session
/// down and, if applicable, notifies the peer with a reason string.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The underlying stream hit EOF or errored.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame's declared length exceeded the configured maximum, or some
    /// other structural framing invariant was violated.
    #[error("framing error: {0}")]
    Framing(String),

    /// Decryption (AEAD open) failed — this covers the "any single-bit flip
    /// in the ciphertext is a fatal error" property of AEAD constructions.
    #[error("decryption failed (corrupt or tampered frame)")]
    DecryptionFailed,

    /// The peer is not in our authorized set, or its signature didn't
    /// verify.
    #[error("handshake authentication failed: {0}")]
    AuthFailed(String),

    /// A JSON frame didn't parse, or lacked a required field.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The peer sent a message type we don't understand in this context.
    #[error("bad message type: {0}")]
    BadMessageType(String),
}

impl WireError {
    /// True iff this error represents a clean end-of-stream rather than a
    /// protocol violation (used to distinguish "disconnected" from "sent
    /// garbage").
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
