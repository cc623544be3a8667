//! Store keys derived from external session ids.

use sha2::{Digest, Sha256};

/// Key of a session entry in the remote store.
///
/// The store addresses entries by a fixed-width SHA-256 digest of the session
/// id; the id itself rides along for logging and for reporting query results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    digest: [u8; 32],
    id: String,
}

impl StoreKey {
    /// Derive the key for a session id.
    pub fn for_session(id: &str) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(id.as_bytes()));
        Self {
            digest,
            id: id.to_string(),
        }
    }

    /// The 32-byte digest the store is addressed by.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The session id this key was derived from.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
