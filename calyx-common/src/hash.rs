//! Content addressing for uploaded images

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const CONTENT_HASH_LEN: usize = 64;

/// Calculate the SHA-256 content address of raw bytes
///
/// Returns 64 lowercase hex characters. Filename and metadata play no part,
/// so identical uploads always map to the same identification cache row.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

/// True if `value` looks like a content hash produced by [`content_hash`]
pub fn is_content_hash(value: &str) -> bool {
    value.len() == CONTENT_HASH_LEN
        && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
