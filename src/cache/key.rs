use sha2::{Digest, Sha256};

use crate::scheme::{ColorMap, Mode};

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn hash_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Cache key for a target's rendered output: `"{target}:{mode}:{sha256}"`.
///
/// The hash covers every `key=value` pair of the mapped colors in key order,
/// so identical scheme and target pairs always collide.
#[must_use]
pub fn target_key(target: &str, mode: Mode, colors: &ColorMap) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in colors {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{target}:{mode}:{:x}", hasher.finalize())
}
