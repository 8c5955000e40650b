//! Content digests for name disambiguation

/// Compute the hex-encoded BLAKE3 digest of `content`
pub fn compute_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// First `len` hex characters of the BLAKE3 digest
///
/// Used to keep truncated filesystem names distinct.
pub fn short_hash(content: &[u8], len: usize) -> String {
    let mut hex = compute_hash(content);
    hex.truncate(len.min(hex.len()));
    hex
}
