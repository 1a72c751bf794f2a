//! Keyring import
//!
//! Turns operator-supplied key material into the stable fingerprint the
//! session cipher derives from. The blob is base64; its SHA-256 digest is
//! the fingerprint. Import failure is fatal at startup: without a shared
//! secret the channel cannot run at all.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::digest;
use thiserror::Error;

/// Minimum decoded key material length in bytes
const MIN_KEY_MATERIAL: usize = 32;

/// Key material import errors
#[derive(Debug, Error)]
pub enum KeyImportError {
    /// No key material supplied
    #[error("key material is empty")]
    Empty,

    /// Blob is not valid base64
    #[error("key material is not valid base64: {0}")]
    Encoding(String),

    /// Decoded blob is too small to be a key
    #[error("key material too short: {0} bytes, need at least 32")]
    TooShort(usize),
}

/// Stable identifier for imported key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({}..)", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Imported key material plus the session passphrase, ready for key
/// derivation.
pub struct ImportedSecret {
    fingerprint: Fingerprint,
    passphrase: String,
}

impl ImportedSecret {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for ImportedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImportedSecret({:?}, passphrase [REDACTED])", self.fingerprint)
    }
}

/// Secret-import collaborator.
pub struct Keyring;

impl Keyring {
    /// Import a base64 key blob, yielding its fingerprint.
    ///
    /// Whitespace (including line breaks from armored exports) is
    /// tolerated. The passphrase is carried through untouched; it
    /// participates in key derivation, not in import validation.
    ///
    /// # Errors
    ///
    /// Returns `KeyImportError` when the material is empty, not base64, or
    /// decodes to fewer than 32 bytes.
    pub fn import(material: &str, passphrase: &str) -> Result<ImportedSecret, KeyImportError> {
        let compact: String = material.split_whitespace().collect();
        if compact.is_empty() {
            return Err(KeyImportError::Empty);
        }

        let raw = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| KeyImportError::Encoding(e.to_string()))?;

        if raw.len() < MIN_KEY_MATERIAL {
            return Err(KeyImportError::TooShort(raw.len()));
        }

        let digest = digest::digest(&digest::SHA256, &raw);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_ref());

        Ok(ImportedSecret {
            fingerprint: Fingerprint(bytes),
            passphrase: passphrase.to_string(),
        })
    }
}
