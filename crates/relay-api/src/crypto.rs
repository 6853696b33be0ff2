//! Ed25519 verification of inbound interaction signatures.
//!
//! Every interaction arrives with a hex-encoded signature in
//! `X-Signature-Ed25519` and a timestamp in `X-Signature-Timestamp`. The
//! signed message is the timestamp bytes followed by the raw request body.

use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use thiserror::Error;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";

/// Header carrying the signed timestamp.
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Problems with the configured public key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key is not valid hex.
    #[error("public key is not valid hex: {0}")]
    InvalidHex(String),

    /// The key decodes to the wrong number of bytes.
    #[error("public key must be 32 bytes, got {0}")]
    InvalidLength(usize),

    /// The bytes are not a valid curve point.
    #[error("public key is not a valid ed25519 point")]
    InvalidPoint,
}

/// Checks that an inbound request was signed by the platform.
pub trait SignatureVerifier: Send + Sync + 'static {
    /// Returns true if `signature` is valid for `timestamp || body`.
    fn verify(&self, signature: &str, timestamp: &str, body: &[u8]) -> bool;
}

impl fmt::Debug for dyn SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignatureVerifier")
    }
}

/// Verifier bound to one application public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Parses a hex-encoded 32-byte public key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if the key is not hex, has the wrong length or is
    /// not a valid point.
    pub fn from_hex(public_key: &str) -> Result<Self, KeyError> {
        let bytes =
            hex::decode(public_key.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            bytes.as_slice().try_into().map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPoint)?;
        Ok(Self { key })
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signature: &str, timestamp: &str, body: &[u8]) -> bool {
        let Ok(raw) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&raw) else {
            return false;
        };

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.key.verify(&message, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn keypair() -> (SigningKey, Ed25519Verifier) {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let verifier =
            Ed25519Verifier::from_hex(&hex::encode(signing.verifying_key().to_bytes())).unwrap();
        (signing, verifier)
    }

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let (signing, verifier) = keypair();
        let signature = sign(&signing, "1700000000", b"{\"type\":1}");
        assert!(verifier.verify(&signature, "1700000000", b"{\"type\":1}"));
    }

    #[test]
    fn tampered_body_or_timestamp_is_rejected() {
        let (signing, verifier) = keypair();
        let signature = sign(&signing, "1700000000", b"{\"type\":1}");
        assert!(!verifier.verify(&signature, "1700000000", b"{\"type\":2}"));
        assert!(!verifier.verify(&signature, "1700000001", b"{\"type\":1}"));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let (_, verifier) = keypair();
        assert!(!verifier.verify("not-hex", "1", b"body"));
        assert!(!verifier.verify("abcd", "1", b"body"));
        assert!(!verifier.verify("", "1", b"body"));
    }

    #[test]
    fn malformed_keys_are_reported() {
        assert!(matches!(Ed25519Verifier::from_hex("zz"), Err(KeyError::InvalidHex(_))));
        assert_eq!(Ed25519Verifier::from_hex("abcd").unwrap_err(), KeyError::InvalidLength(2));
    }
}
