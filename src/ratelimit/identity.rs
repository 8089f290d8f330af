//! Client identity hashing.
//!
//! Counters are keyed by a one-way digest of the client identity (usually an
//! IP address) so that raw addresses never reach durable storage.

use sha2::{Digest, Sha256};
use std::fmt;

/// Identity used when the caller's address could not be determined.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Hex-encoded SHA-256 digest of a client identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityHash(String);

impl IdentityHash {
    /// Borrow the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes client identities, optionally with a deployment-wide salt.
#[derive(Debug, Clone, Default)]
pub struct IdentityHasher {
    salt: String,
}

impl IdentityHasher {
    /// Create a hasher. An empty salt gives a plain SHA-256 of the identity.
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Hash an identity. Blank identities hash as [`UNKNOWN_IDENTITY`].
    pub fn hash(&self, identity: &str) -> IdentityHash {
        let identity = match identity.trim() {
            "" => UNKNOWN_IDENTITY,
            trimmed => trimmed,
        };

        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(identity.as_bytes());
        IdentityHash(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsalted_hash_is_plain_sha256() {
        let hasher = IdentityHasher::default();
        assert_eq!(
            hasher.hash("127.0.0.1").as_str(),
            "12ca17b49af2289436f303e0166030a21e525d266e209267433801a8fd4071a0"
        );
    }

    #[test]
    fn test_hash_is_fixed_length_and_opaque() {
        let hasher = IdentityHasher::new("pepper");
        let hash = hasher.hash("10.0.0.1");
        assert_eq!(hash.as_str().len(), 64);
        assert!(!hash.as_str().contains("10.0.0.1"));
    }

    #[test]
    fn test_salt_changes_digest() {
        let plain = IdentityHasher::default().hash("10.0.0.1");
        let salted = IdentityHasher::new("pepper").hash("10.0.0.1");
        assert_ne!(plain, salted);
    }

    #[test]
    fn test_distinct_identities_distinct_hashes() {
        let hasher = IdentityHasher::default();
        assert_ne!(hasher.hash("1.2.3.4"), hasher.hash("1.2.3.5"));
    }

    #[test]
    fn test_blank_identity_uses_sentinel() {
        let hasher = IdentityHasher::default();
        assert_eq!(hasher.hash(""), hasher.hash(UNKNOWN_IDENTITY));
        assert_eq!(hasher.hash("   "), hasher.hash(UNKNOWN_IDENTITY));
    }
}
