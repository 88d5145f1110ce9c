// Address derivation: an account's address is an opaque identifier
// derived from its public key, not a bech32-style human-readable form —
// a fixed-length prefix of a digest of the public key's DER encoding.
use super::signer::PublicKey;
use crate::crypto::hash::digest;

/// Addresses are this many hex characters (= bytes/2) of the digest.
pub const ADDRESS_HEX_LEN: usize = 40;

pub type Address = String;

/// Derives an address from a public key: the first `ADDRESS_HEX_LEN`
/// hex characters of a digest of its DER encoding. A prefix of the DER
/// encoding itself won't do — RSA-2048 keys share a constant header for
/// their first ~33 bytes, so the varying modulus only shows up past
/// that point. Hashing first spreads that variation across the whole
/// prefix. Equality on addresses is plain byte (string) equality.
pub fn derive_address(pk: &PublicKey) -> Address {
    digest(pk.to_hex().as_bytes()).chars().take(ADDRESS_HEX_LEN).collect()
}
