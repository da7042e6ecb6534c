//! Blake3 hashing for argument-derived cache keys

use serde::Serialize;

/// Hash raw bytes with blake3.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// Hash the canonical JSON form of `value`.
///
/// Struct fields serialize in declaration order, so the hash is stable as
/// long as the argument type is. Callers with set-like fields should sort
/// them first.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<blake3::Hash, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(hash_bytes(&json))
}

/// Return the first 8 hex characters of a blake3 hash.
pub fn short_hash(hash: &blake3::Hash) -> String {
    hash.to_hex()[..8].to_string()
}
