//! Credential encryption for SMB passwords.
//!
//! Passwords never reach the config file in plaintext. The registry keeps the
//! ciphertext and asks the store to decrypt it only when building mount
//! options.

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use vitrine_common::{Error, Result};

/// Prefix marking values produced by [`AesSecretStore`].
const ENCRYPTED_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;

const KEY_SALT: &[u8] = b"vitrine-secret-store-v1";

/// Files tried, in order, when no key file is configured.
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Encrypts and decrypts stored credentials.
pub trait SecretStore: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM with a key derived from a machine-bound key file.
///
/// Output format: `enc:v1:` followed by base64 of `nonce || ciphertext`.
pub struct AesSecretStore {
    /// `Err` holds why no key could be loaded.
    cipher: std::result::Result<Aes256Gcm, String>,
}

impl std::fmt::Debug for AesSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesSecretStore").finish_non_exhaustive()
    }
}

impl AesSecretStore {
    /// Derive the key from arbitrary key material.
    pub fn from_key_material(material: &[u8]) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(material);
        hasher.update(KEY_SALT);
        let key = hasher.finalize();

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::secret(format!("failed to create cipher: {e}")))?;
        Ok(Self { cipher: Ok(cipher) })
    }

    /// Like [`load`](Self::load), but a missing key does not fail.
    ///
    /// The returned store rejects every encrypt and decrypt call with
    /// [`Error::Secret`], so only sources that carry credentials are affected.
    pub fn open(key_file: Option<&Path>) -> Self {
        match Self::load(key_file) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("Stored credentials are unavailable: {}", e);
                Self {
                    cipher: Err(e.to_string()),
                }
            }
        }
    }

    fn cipher(&self) -> Result<&Aes256Gcm> {
        self.cipher
            .as_ref()
            .map_err(|reason| Error::secret(reason.clone()))
    }

    /// Read key material from `key_file`, or from the machine id when `None`.
    pub fn load(key_file: Option<&Path>) -> Result<Self> {
        let candidates: Vec<PathBuf> = match key_file {
            Some(path) => vec![path.to_path_buf()],
            None => MACHINE_ID_PATHS.iter().map(PathBuf::from).collect(),
        };

        for path in &candidates {
            if let Ok(material) = std::fs::read_to_string(path) {
                let material = material.trim();
                if !material.is_empty() {
                    tracing::debug!("Secret key derived from {:?}", path);
                    return Self::from_key_material(material.as_bytes());
                }
            }
        }

        Err(Error::secret(format!(
            "no key material found in {:?}",
            candidates
        )))
    }
}

impl SecretStore for AesSecretStore {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::secret(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENCRYPTED_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(&combined)
        ))
    }

    fn decrypt(&self, encrypted: &str) -> Result<String> {
        let encoded = encrypted
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| Error::secret("missing encryption prefix"))?;

        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::secret(format!("invalid base64: {e}")))?;

        if combined.len() <= NONCE_LEN {
            return Err(Error::secret("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::secret("decryption failed (wrong key or corrupted data)"))?;

        String::from_utf8(plaintext).map_err(|e| Error::secret(format!("invalid UTF-8: {e}")))
    }
}
