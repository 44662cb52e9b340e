use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;

/// Leading byte of every sealed artifact.
const FORMAT_V1: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Seals staged uploads with AES-256-GCM.
///
/// Layout on disk is `version || nonce || ciphertext`. The artifact locator is
/// bound as associated data, so a sealed file only opens under the name it was
/// staged with.
pub struct ArtifactCipher {
    cipher: Aes256Gcm,
}

impl ArtifactCipher {
    /// Build from the base64 key in `ENCRYPTION_KEY`.
    pub fn from_base64(key: &str) -> Result<Self, CipherError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|_| CipherError::InvalidKey)?;
        Self::from_key_bytes(&key)
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, locator: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext,
            aad: locator.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.push(FORMAT_V1);
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, locator: &str, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        let Some((&version, rest)) = sealed.split_first() else {
            return Err(CipherError::Truncated);
        };
        if version != FORMAT_V1 {
            return Err(CipherError::UnsupportedVersion(version));
        }
        if rest.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: locator.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CipherError::Open)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption key must be 32 bytes, base64-encoded")]
    InvalidKey,

    #[error("sealing the artifact failed")]
    Seal,

    #[error("artifact failed authentication")]
    Open,

    #[error("sealed artifact is truncated")]
    Truncated,

    #[error("unsupported sealed artifact version {0}")]
    UnsupportedVersion(u8),
}
