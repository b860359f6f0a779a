use sha2::{Digest, Sha256};

/// Stable cache identifier for a URL (or custom cache key).
///
/// Lowercase hex SHA-256, so it is filename-safe and survives restarts.
pub fn identifier_for(url: &str) -> String {
    let hash = Sha256::digest(url.as_bytes());
    format!("{hash:x}")
}

/// Whether `name` looks like something [`identifier_for`] produced
pub(crate) fn is_identifier(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
