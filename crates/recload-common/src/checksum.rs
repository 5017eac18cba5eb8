//! Content checksums for persisted records

use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice, hex encoded
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Checksum of a JSON value's canonical serialization
///
/// Key order follows the value's own (insertion) order, so two records only
/// hash equal when their normalized fields were written in the same order.
pub fn json_checksum(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    sha256_hex(&bytes)
}
