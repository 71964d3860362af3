//! Long-term signing identity, persisted under `$XDG_CONFIG_HOME`.
//!
//! Same config file pattern throughout: read-if-present, normalize,
//! write-to-tmp-then-rename. Used for both the coordinator's and the
//! evaluator host's long-term Ed25519 identity.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Errors from loading or persisting an identity file.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed identity file: {0}")]
    Malformed(String),
    #[error("could not resolve a config directory: {0}")]
    NoConfigDir(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    /// Base64-encoded 32-byte Ed25519 seed.
    seed_b64: String,
}

/// A long-term Ed25519 signing identity.
pub struct SigningIdentity {
    signing_key: SigningKey,
}

impl SigningIdentity {
    /// Generate a fresh random identity (not persisted).
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// The long-term public identity.
    pub fn public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The underlying signing key, for use by `pah-wire`'s handshake.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// A short, human-shareable fingerprint of the public identity (for
    /// display during `--vouch`).
    pub fn fingerprint(&self) -> String {
        B64.encode(self.public().as_bytes())
    }

    /// Load the identity from `path`, or generate and persist a new one if
    /// the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if let Some(existing) = Self::load(path)? {
            return Ok(existing);
        }
        let identity = Self::generate();
        identity.persist(path)?;
        Ok(identity)
    }

    /// Load the identity from `path`, returning `None` if the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Option<Self>, IdentityError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let file: IdentityFile =
            serde_json::from_str(&raw).map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let seed = B64
            .decode(&file.seed_b64)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| IdentityError::Malformed("seed must be 32 bytes".to_string()))?;
        Ok(Some(Self {
            signing_key: SigningKey::from_bytes(&seed),
        }))
    }

    /// Persist the identity to `path`, creating parent directories and
    /// writing atomically (write-tmp-then-rename), as in `submitter.rs`.
    pub fn persist(&self, path: &Path) -> Result<(), IdentityError> {
        let dir = path
            .parent()
            .ok_or_else(|| IdentityError::Malformed(format!("invalid path: {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let file = IdentityFile {
            seed_b64: B64.encode(self.signing_key.to_bytes()),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
        }
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Resolve `$XDG_CONFIG_HOME` (or `$HOME/.config`), matching
/// `client-core/src/submitter.rs::xdg_config_home`.
pub fn xdg_config_home() -> Result<PathBuf, IdentityError> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            return Err(IdentityError::NoConfigDir(
                "XDG_CONFIG_HOME is set but empty".to_string(),
            ));
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME")
        .ok_or_else(|| IdentityError::NoConfigDir("HOME is not set".to_string()))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        return Err(IdentityError::NoConfigDir("HOME is set but empty".to_string()));
    }
    Ok(home.join(".config"))
}

/// Resolve the identity file path for `app` (e.g. `"permuter-home"`).
pub fn identity_path(app: &str) -> Result<PathBuf, IdentityError> {
    Ok(xdg_config_home()?.join(app).join("identity.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_reloads_identical_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let identity = SigningIdentity::load_or_create(&path).unwrap();
        let pub1 = identity.public();

        let reloaded = SigningIdentity::load_or_create(&path).unwrap();
        assert_eq!(pub1, reloaded.public());
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        assert!(SigningIdentity::load(&path).unwrap().is_none());
    }
}
