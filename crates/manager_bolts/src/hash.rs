//! Content hashing for the persistent corpus store's filenames.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `content`, used directly as a filename.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(digest)
}
