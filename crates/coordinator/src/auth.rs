//! Identity bootstrap, the directory-service lookup, and the `--vouch`
//! flow.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use pah_core::identity::{identity_path, IdentityError, SigningIdentity};

const APP_NAME: &str = "permuter-home";

/// Errors from the auth/directory flows.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("directory service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("directory listing signature did not verify")]
    BadSignature,
    #[error("directory listing was malformed: {0}")]
    Malformed(String),
}

/// Load (or create on first run) this machine's long-term identity.
pub fn setup() -> Result<SigningIdentity, AuthError> {
    let path = identity_path(APP_NAME)?;
    Ok(SigningIdentity::load_or_create(&path)?)
}

#[derive(Debug, Deserialize)]
struct SignedServerList {
    /// Base64-encoded JSON array of `ServerEntry`, as bytes that were signed.
    payload_b64: String,
    /// Base64-encoded Ed25519 signature over the raw (decoded) payload.
    signature_b64: String,
    /// The directory service's own long-term public key, for display/audit.
    directory_pub_b64: String,
}

/// One server entry as published by the directory service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerEntry {
    pub nickname: String,
    pub address: String,
    pub identity_pub_b64: String,
}

/// Fetch the signed server list from `directory_url`, verify it against
/// `expected_directory_pub` (pinned out of band, e.g. shipped in config),
/// and return the parsed entries.
pub fn fetch_servers_and_grant(
    directory_url: &str,
    expected_directory_pub: &VerifyingKey,
) -> Result<Vec<ServerEntry>, AuthError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let listing: SignedServerList = client.get(directory_url).send()?.error_for_status()?.json()?;

    let directory_pub_bytes = B64
        .decode(&listing.directory_pub_b64)
        .map_err(|e| AuthError::Malformed(format!("bad directory_pub: {e}")))?;
    let directory_pub_arr: [u8; 32] = directory_pub_bytes
        .try_into()
        .map_err(|_| AuthError::Malformed("directory_pub must be 32 bytes".to_string()))?;
    if directory_pub_arr != expected_directory_pub.to_bytes() {
        return Err(AuthError::Malformed(
            "directory service identity does not match the pinned key".to_string(),
        ));
    }

    let payload = B64
        .decode(&listing.payload_b64)
        .map_err(|e| AuthError::Malformed(format!("bad payload: {e}")))?;
    let signature_bytes = B64
        .decode(&listing.signature_b64)
        .map_err(|e| AuthError::Malformed(format!("bad signature: {e}")))?;
    let signature_arr: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| AuthError::Malformed("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&signature_arr);

    expected_directory_pub
        .verify(&payload, &signature)
        .map_err(|_| AuthError::BadSignature)?;

    serde_json::from_slice(&payload).map_err(|e| AuthError::Malformed(format!("bad entries: {e}")))
}

/// Print this machine's identity fingerprint and a signed vouch token that
/// an operator can paste into another host's authorized-keys list, for the
/// `--vouch` CLI flag.
pub fn run_vouch(identity: &SigningIdentity, note: &str) -> String {
    let signature: Signature = identity.signing_key().sign(note.as_bytes());
    format!(
        "identity: {}\nnote: {note}\nsignature: {}\n",
        identity.fingerprint(),
        B64.encode(signature.to_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vouch_output_contains_fingerprint_and_signature() {
        let identity = SigningIdentity::generate();
        let out = run_vouch(&identity, "alice's workstation");
        assert!(out.contains(&identity.fingerprint()));
        assert!(out.contains("alice's workstation"));
    }
}
