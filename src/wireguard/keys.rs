//! WireGuard key material
//!
//! x25519 key generation and base64 parsing. Private keys are zeroized on
//! drop and never printed; the control plane hands them to the caller once
//! inside a client config and keeps only the public half.

use crate::error::{ArmorError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

fn decode_key(s: &str, what: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| ArmorError::DeviceConfig(format!("Invalid base64 {}: {}", what, e)))?;

    <[u8; 32]>::try_from(decoded.as_slice()).map_err(|_| {
        ArmorError::DeviceConfig(format!(
            "Invalid {} length: expected 32 bytes, got {}",
            what,
            decoded.len()
        ))
    })
}

/// WireGuard private key (32 bytes, x25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; 32]>,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self {
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }

    /// Parse a private key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self {
            secret: Zeroizing::new(decode_key(s, "private key")?),
        })
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(*self.secret)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.secret);
        PublicKey {
            key: X25519PublicKey::from(&secret).to_bytes(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

// Ensure private keys are never accidentally logged
impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// WireGuard public key (32 bytes, x25519)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: [u8; 32],
}

impl PublicKey {
    /// Parse a public key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self {
            key: decode_key(s, "public key")?,
        })
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// WireGuard key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    /// Private key
    pub private: PrivateKey,
    /// Public key (derived from private)
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let private = PrivateKey::generate();
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}
