//! Peer-set fingerprints
//!
//! A fingerprint is the SHA-256 hex digest of the canonical JSON encoding of
//! a peer set. Canonical means sorted by public key, so the same set always
//! hashes the same regardless of the order the store returned it in. The
//! control plane and the agent both hash with [`fingerprint`], which is what
//! makes their values comparable.

use crate::error::Result;
use crate::models::PeerSpec;
use sha2::{Digest, Sha256};

/// Compute the fingerprint of a peer set
pub fn fingerprint(peers: &[PeerSpec]) -> Result<String> {
    let mut sorted: Vec<&PeerSpec> = peers.iter().collect();
    sorted.sort_by(|a, b| {
        a.public_key
            .cmp(&b.public_key)
            .then_with(|| a.assigned_ip.cmp(&b.assigned_ip))
    });

    let canonical = serde_json::to_vec(&sorted)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Whether an observed fingerprint diverges from a desired one.
///
/// An empty desired fingerprint means nothing was ever pushed, which is never drift.
pub fn is_drift(desired: Option<&str>, observed: Option<&str>) -> bool {
    match desired.filter(|d| !d.is_empty()) {
        Some(desired) => observed != Some(desired),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeerStatus;

    fn spec(key: &str, ip: &str) -> PeerSpec {
        PeerSpec {
            public_key: key.to_string(),
            assigned_ip: ip.parse().unwrap(),
            allowed_ips: "0.0.0.0/0".to_string(),
            status: PeerStatus::Active,
        }
    }

    #[test]
    fn test_order_independent() {
        let a = vec![spec("AAA=", "10.8.0.2"), spec("BBB=", "10.8.0.3")];
        let b = vec![spec("BBB=", "10.8.0.3"), spec("AAA=", "10.8.0.2")];
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_content_sensitive() {
        let a = vec![spec("AAA=", "10.8.0.2")];
        let b = vec![spec("AAA=", "10.8.0.4")];
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_empty_set_has_stable_hash() {
        let hash = fingerprint(&[]).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, fingerprint(&[]).unwrap());
    }

    #[test]
    fn test_drift_rules() {
        assert!(!is_drift(None, Some("h2")));
        assert!(!is_drift(Some(""), Some("h2")));
        assert!(!is_drift(Some("h1"), Some("h1")));
        assert!(is_drift(Some("h1"), Some("h2")));
        assert!(is_drift(Some("h1"), None));
    }
}
