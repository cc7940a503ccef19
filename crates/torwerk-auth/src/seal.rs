// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Token sealing — age (X25519 / scrypt) protection for the durable copy of
// the authorization token, plus SHA-256 fingerprinting so raw tokens never
// reach logs or the audit trail.

use std::io::{Read, Write};

use age::secrecy::SecretString;
use sha2::{Digest, Sha256};
use torwerk_core::error::TorwerkError;
use tracing::{debug, instrument};

/// Passphrase-based sealer for token bytes at rest.
///
/// Each seal/unseal call is stateless — the passphrase is held only for the
/// lifetime of the `TokenSealer` value (inside a `SecretString`, zeroised
/// on drop). Where the passphrase comes from is the host's concern; on
/// device it is typically fetched from the platform keystore.
pub struct TokenSealer {
    passphrase: SecretString,
}

impl TokenSealer {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Seal `plaintext` and return a complete age file (header + payload)
    /// suitable for writing straight into the store.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, TorwerkError> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let mut sealed = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut sealed)
            .map_err(|e| TorwerkError::StorageUnavailable(format!("seal: {e}")))?;

        writer
            .write_all(plaintext)
            .map_err(|e| TorwerkError::StorageUnavailable(format!("seal: {e}")))?;

        writer
            .finish()
            .map_err(|e| TorwerkError::StorageUnavailable(format!("seal: {e}")))?;

        debug!(sealed_len = sealed.len(), "token sealed");
        Ok(sealed)
    }

    /// Unseal a previously sealed value and return the original bytes.
    #[instrument(skip_all, fields(sealed_len = sealed.len()))]
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, TorwerkError> {
        let decryptor = age::Decryptor::new(sealed)
            .map_err(|e| TorwerkError::StorageUnavailable(format!("unseal: {e}")))?;

        let identity = age::scrypt::Identity::new(self.passphrase.clone());

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| TorwerkError::StorageUnavailable(format!("unseal: {e}")))?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| TorwerkError::StorageUnavailable(format!("unseal: {e}")))?;

        debug!(plaintext_len = plaintext.len(), "token unsealed");
        Ok(plaintext)
    }
}

/// Short fingerprint of a token — first 8 bytes of SHA-256, hex-encoded.
///
/// Used as the audit-trail subject and in log fields. Collisions are
/// irrelevant at this length for a single device's token history.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_round_trip() {
        let sealer = TokenSealer::new("correct-horse-battery-staple");
        let token = b"Bearer eyJhbGciOiJSUzI1NiJ9.payload.sig";

        let sealed = sealer.seal(token).expect("seal failed");
        assert_ne!(&sealed[..], &token[..], "sealed form must differ");

        let unsealed = sealer.unseal(&sealed).expect("unseal failed");
        assert_eq!(unsealed, token);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealer_a = TokenSealer::new("passphrase-alpha");
        let sealer_b = TokenSealer::new("passphrase-beta");

        let sealed = sealer_a.seal(b"secret").expect("seal failed");
        assert!(sealer_b.unseal(&sealed).is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = token_fingerprint("Bearer xyz");
        let b = token_fingerprint("Bearer xyz");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16); // 8 bytes hex-encoded

        let other = token_fingerprint("Bearer abc");
        assert_ne!(a, other);
    }

    #[test]
    fn fingerprint_does_not_contain_token() {
        let fp = token_fingerprint("Bearer super-secret-token");
        assert!(!fp.contains("secret"));
    }
}
