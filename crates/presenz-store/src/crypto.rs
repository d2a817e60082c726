//! Sealing of stored encodings.
//!
//! Encodings are encrypted at rest with AES-256-GCM under a
//! per-installation key. Sealed blob layout: 12-byte nonce followed by
//! ciphertext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key file {path}: {source}")]
    KeyIo {
        path: String,
        source: std::io::Error,
    },
    #[error("key file {0} has the wrong length")]
    BadKeyLength(String),
    #[error("seal failed")]
    Seal,
    #[error("unseal failed — wrong key or corrupt blob")]
    Unseal,
}

/// Per-installation sealing key.
#[derive(Clone)]
pub struct SealingKey {
    key: [u8; KEY_LEN],
}

impl SealingKey {
    /// Load the key file, generating one (mode 0600) on first run.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        let io_err = |source| CryptoError::KeyIo {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let key: [u8; KEY_LEN] = bytes
                .try_into()
                .map_err(|_| CryptoError::BadKeyLength(path.display().to_string()))?;
            return Ok(Self { key });
        }

        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        std::fs::write(path, key).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        tracing::info!(path = %path.display(), "generated new sealing key");
        Ok(Self { key })
    }

    /// Build a key from raw bytes (tests and key migration tooling).
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// First four bytes of the key's SHA-256, hex-encoded, for startup logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn unseal(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Unseal);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Unseal)
    }
}

/// Encoding vector to little-endian bytes.
pub fn vector_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Little-endian bytes back to an encoding vector. `None` on a torn blob.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_a() -> SealingKey {
        SealingKey::from_bytes([7u8; KEY_LEN])
    }

    #[test]
    fn test_seal_unseal_round_trip() {
        let key = key_a();
        let blob = key.seal(b"biometric payload").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"biometric payload".as_slice());
        assert_eq!(key.unseal(&blob).unwrap(), b"biometric payload");
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = key_a();
        let mut blob = key.seal(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(key.unseal(&blob), Err(CryptoError::Unseal)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = key_a().seal(b"payload").unwrap();
        let other = SealingKey::from_bytes([9u8; KEY_LEN]);
        assert!(matches!(other.unseal(&blob), Err(CryptoError::Unseal)));
    }

    #[test]
    fn test_truncated_blob_fails() {
        assert!(matches!(key_a().unseal(&[0u8; 4]), Err(CryptoError::Unseal)));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = key_a().fingerprint();
        assert_eq!(fp.len(), 8);
        assert_eq!(fp, key_a().fingerprint());
    }

    #[test]
    fn test_vector_round_trip() {
        let values = vec![0.25f32, -1.5, 3.75];
        let bytes = vector_to_bytes(&values);
        assert_eq!(vector_from_bytes(&bytes).unwrap(), values);
        assert!(vector_from_bytes(&bytes[..5]).is_none());
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealing.key");
        let first = SealingKey::load_or_generate(&path).unwrap();
        let second = SealingKey::load_or_generate(&path).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
