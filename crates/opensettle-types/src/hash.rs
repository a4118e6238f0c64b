//! The single hash seam used across the engine.
//!
//! State roots, asset identifiers, idempotency tokens, and transaction
//! signing payloads all hash through [`LedgerHasher`]. The algorithm is
//! injected once and used consistently — there is deliberately no second
//! hash function anywhere in the workspace, so a commitment produced by one
//! component always verifies against material produced by another.

/// Sentinel root for an empty leaf set, and the "no state" marker a
/// commitment proposal is never allowed to carry.
pub const ZERO_HASH: [u8; 32] = [0u8; 32];

/// Hash function seam. Implementations must be pure: identical input parts
/// produce an identical digest on every call, on every host.
pub trait LedgerHasher: Send + Sync {
    /// Digest the concatenation of `parts`.
    fn digest(&self, parts: &[&[u8]]) -> [u8; 32];
}

/// SHA-256 implementation of [`LedgerHasher`] — the production algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl LedgerHasher for Sha256Hasher {
    fn digest(&self, parts: &[&[u8]]) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let result = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }
}

/// Whether a digest is the all-zero sentinel.
#[must_use]
pub fn is_zero_hash(hash: &[u8; 32]) -> bool {
    *hash == ZERO_HASH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let h = Sha256Hasher;
        let a = h.digest(&[b"BAL", b"payload"]);
        let b = h.digest(&[b"BAL", b"payload"]);
        assert_eq!(a, b);
    }

    #[test]
    fn digest_concatenation_matters_only_as_bytes() {
        // Split points must not affect the digest — only the concatenated bytes.
        let h = Sha256Hasher;
        let a = h.digest(&[b"BALpay", b"load"]);
        let b = h.digest(&[b"BAL", b"payload"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_input_different_digest() {
        let h = Sha256Hasher;
        assert_ne!(h.digest(&[b"a"]), h.digest(&[b"b"]));
    }

    #[test]
    fn zero_hash_detection() {
        assert!(is_zero_hash(&ZERO_HASH));
        assert!(!is_zero_hash(&Sha256Hasher.digest(&[b"x"])));
    }
}
