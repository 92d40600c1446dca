//! Message sealing with the shared cluster key.
//!
//! Every segment of an RPC frame is sealed independently with
//! XChaCha20-Poly1305 and encoded as a URL-safe base64 token:
//!
//! ```text
//! base64url(nonce[24] || ciphertext || tag[16])
//! ```
//!
//! The token alphabet (`A-Z a-z 0-9 - _`) never contains the frame
//! terminator bytes or the payload separator, so framing needs no escaping.
//! The Poly1305 tag makes tampering and key mismatch detectable.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::XChaCha20Poly1305;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use rand::RngCore;

use fleet_common::ClusterError;
use fleet_common::constants::{CLUSTER_KEY_LEN, rpc::NONCE_LEN};

/// Symmetric cipher keyed by the 32-byte cluster secret
#[derive(Clone)]
pub struct ClusterCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for ClusterCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCipher").finish_non_exhaustive()
    }
}

impl ClusterCipher {
    /// Build from the configured key; the key bytes are used as-is
    pub fn new(key: &str) -> Result<Self, ClusterError> {
        if key.len() != CLUSTER_KEY_LEN {
            return Err(ClusterError::validation(
                "key",
                format!("expected {CLUSTER_KEY_LEN} bytes, got {}", key.len()),
            ));
        }

        Ok(Self {
            cipher: XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes())),
        })
    }

    /// Seal `plaintext` into a token
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|e| ClusterError::Internal(format!("encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed).into_bytes())
    }

    /// Open a token. `peer` only labels the error.
    pub fn decrypt(&self, token: &[u8], peer: &str) -> Result<Vec<u8>, ClusterError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ClusterError::DecryptionFailed(peer.to_string()))?;

        if sealed.len() < NONCE_LEN {
            return Err(ClusterError::DecryptionFailed(peer.to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| ClusterError::DecryptionFailed(peer.to_string()))
    }
}
