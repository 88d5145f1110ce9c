// SHA-256 digests and the canonical map-hashing scheme every `id` is built from.
use sha2::{Digest, Sha256};

/// SHA-256 of the empty byte string, hex encoded. Used uniformly for
/// empty transaction lists and the genesis block's `parent_hash`.
pub const BLANK_SHA_256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// 32-byte SHA-256 digest of `bytes`, hex encoded.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Raw 32-byte SHA-256 digest, for callers that need the bytes (e.g.
/// proof-of-work, which concatenates digests before re-hashing).
pub fn digest_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hashes a map by sorting its entries, concatenating `key || value`
/// pairs joined by `"|"`, and digesting the result. This is the basis
/// of every record `id` and of the world-state `hash_state`.
pub fn hash_map(entries: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}{v}"))
        .collect::<Vec<_>>()
        .join("|");
    digest(joined.as_bytes())
}
