//! Session cipher
//!
//! Derives a ChaCha20-Poly1305 key from the imported secret and seals
//! message envelopes. Ciphertext layout: `nonce (12 bytes) || ciphertext || tag`.
//!
//! A fresh random nonce travels with every message. The channel has no
//! handshake, so `open` runs against every completed fragment set and a
//! failure is routine (wrong key, corrupted fragments, or foreign traffic
//! that happened to parse), not exceptional.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

use crate::keyring::ImportedSecret;

/// Symmetric key length (ChaCha20)
const KEY_LEN: usize = 32;

/// HKDF info label binding derived keys to this protocol
const KDF_INFO: &[u8] = b"dnswhisper session key v1";

/// Cipher errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("ciphertext could not be decrypted")]
    Decrypt,
}

/// Symmetric cipher shared by both halves of the session.
///
/// Immutable after derivation; safe to share behind an `Arc` between the
/// send loop and the capture task.
pub struct SessionCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SessionCipher {
    /// Derive the session key from the imported secret.
    ///
    /// HKDF-SHA256 with the passphrase as salt and the key fingerprint as
    /// input key material. The derivation is deterministic, so both peers
    /// arrive at the same key independently.
    pub fn derive(secret: &ImportedSecret) -> Result<Self, CryptoError> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, secret.passphrase().as_bytes());
        let prk = salt.extract(secret.fingerprint().as_bytes());

        let mut okm = [0u8; KEY_LEN];
        prk.expand(&[KDF_INFO], OkmLen(KEY_LEN))
            .map_err(|_| CryptoError::KeyDerivation)?
            .fill(&mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;

        let key = UnboundKey::new(&CHACHA20_POLY1305, &okm).map_err(|_| CryptoError::KeyDerivation)?;

        Ok(Self {
            key: LessSafeKey::new(key),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a serialized envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Encrypt)?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Decrypt a reassembled ciphertext.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` when the input is truncated, the
    /// authentication tag does not verify, or the key is wrong.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN + CHACHA20_POLY1305.tag_len() {
            return Err(CryptoError::Decrypt);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Decrypt)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decrypt)?;

        Ok(plaintext.to_vec())
    }
}

// Helper type for ring's HKDF API
struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}
