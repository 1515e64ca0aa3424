//! Nonce generation for Apple federated sign-in.
//!
//! The raw nonce goes to the identity provider, the SHA-256 hex digest goes to
//! Apple in the authorization request. The OS random source is the only
//! accepted entropy; if it fails the process cannot safely continue.

use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::fmt::Write;

const NONCE_LENGTH: usize = 32;
const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVXYZabcdefghijklmnopqrstuvwxyz-._";

#[derive(Clone, PartialEq, Eq)]
pub struct Nonce {
    raw: String,
}

impl Nonce {
    /// Generate a fresh nonce from the OS random source.
    ///
    /// # Panics
    /// Panics when the OS random source fails; there is no safe fallback.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LENGTH];
        if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
            panic!("unable to generate nonce, OS random source failed: {err}");
        }
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let raw = bytes
            .iter()
            .map(|byte| char::from(CHARSET[usize::from(*byte) % CHARSET.len()]))
            .collect();
        Self { raw }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Lowercase hex SHA-256 of the raw nonce.
    #[must_use]
    pub fn sha256(&self) -> String {
        let digest = Sha256::digest(self.raw.as_bytes());
        digest.iter().fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }

    #[must_use]
    pub fn into_raw(self) -> String {
        self.raw
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Nonce([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_charset_only_nonce() {
        let nonce = Nonce::generate();
        assert_eq!(nonce.raw().len(), NONCE_LENGTH);
        assert!(nonce.raw().bytes().all(|byte| CHARSET.contains(&byte)));
    }

    #[test]
    fn generate_is_not_repeating() {
        assert_ne!(Nonce::generate(), Nonce::generate());
    }

    #[test]
    fn from_bytes_wraps_over_charset() {
        let nonce = Nonce::from_bytes(&[0, 1, 64, 255]);
        // 64 % 64 == 0, 255 % 64 == 63
        assert_eq!(CHARSET.len(), 64);
        assert_eq!(nonce.raw(), "010_");
    }

    #[test]
    fn sha256_is_hex_digest_of_raw() {
        let nonce = Nonce {
            raw: "abc".to_string(),
        };
        assert_eq!(
            nonce.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn debug_redacts_value() {
        let nonce = Nonce::generate();
        assert_eq!(format!("{nonce:?}"), "Nonce([REDACTED])");
    }
}
