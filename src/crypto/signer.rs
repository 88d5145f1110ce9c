// RSA-PSS signing over a SHA-256 prehash. The black-box primitive the
// design treats as an external collaborator — a thin wrapper, not a
// protocol of its own.
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use sha2::Sha256;
use rsa::{RsaPrivateKey, RsaPublicKey};

pub const KEY_BITS: usize = 2048;

#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let sk = RsaPrivateKey::new(&mut OsRng, KEY_BITS).expect("RSA key generation failed");
    let pk = RsaPublicKey::from(&sk);
    (PrivateKey(sk), PublicKey(pk))
}

/// Signs the SHA-256 digest of `message` with RSA-PSS, returning raw
/// signature bytes (no base64 — the wire codec is binary, not JSON).
pub fn sign(sk: &PrivateKey, message: &[u8]) -> Vec<u8> {
    let digest = super::hash::digest_bytes(message);
    let signing_key = BlindedSigningKey::<Sha256>::new(sk.0.clone());
    let signature: Signature = signing_key.sign_with_rng(&mut OsRng, &digest);
    signature.to_bytes().into_vec()
}

/// Verifies a signature over `message` under `pk`. Never panics on
/// malformed input — returns `false`.
pub fn verify(pk: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(sig) = Signature::try_from(signature) else {
        return false;
    };
    let digest = super::hash::digest_bytes(message);
    let verifying_key = VerifyingKey::<Sha256>::new(pk.0.clone());
    verifying_key.verify(&digest, &sig).is_ok()
}

impl PrivateKey {
    pub fn to_pem(&self) -> crate::error::Result<String> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| crate::error::Error::Key(format!("encode private key: {e}")))
    }

    pub fn from_pem(pem: &str) -> crate::error::Result<Self> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(PrivateKey)
            .map_err(|e| crate::error::Error::Key(format!("decode private key: {e}")))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(RsaPublicKey::from(&self.0))
    }
}

impl PublicKey {
    pub fn to_pem(&self) -> crate::error::Result<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| crate::error::Error::Key(format!("encode public key: {e}")))
    }

    pub fn from_pem(pem: &str) -> crate::error::Result<Self> {
        RsaPublicKey::from_public_key_pem(pem)
            .map(PublicKey)
            .map_err(|e| crate::error::Error::Key(format!("decode public key: {e}")))
    }

    /// Hex encoding of the DER-encoded SubjectPublicKeyInfo — this is
    /// what addresses are derived from (see [`crate::crypto::keys`]).
    pub fn to_hex(&self) -> String {
        use rsa::pkcs8::EncodePublicKey as _;
        let der = self.0.to_public_key_der().expect("public key always encodes");
        hex::encode(der.as_bytes())
    }

    /// Decodes a DER-encoded SubjectPublicKeyInfo, the inverse of [`to_hex`](Self::to_hex)
    /// (after hex-decoding).
    pub fn from_der(der: &[u8]) -> crate::error::Result<Self> {
        use rsa::pkcs8::DecodePublicKey as _;
        RsaPublicKey::from_public_key_der(der)
            .map(PublicKey)
            .map_err(|e| crate::error::Error::Key(format!("decode public key der: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let (sk, pk) = generate_keypair();
        let msg = b"transfer 100 units";
        let sig = sign(&sk, msg);
        assert!(verify(&pk, msg, &sig));
    }

    #[test]
    fn flipping_a_message_byte_breaks_verification() {
        let (sk, pk) = generate_keypair();
        let mut msg = b"transfer 100 units".to_vec();
        let sig = sign(&sk, &msg);
        msg[0] ^= 0xFF;
        assert!(!verify(&pk, &msg, &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (sk, _) = generate_keypair();
        let (_, other_pk) = generate_keypair();
        let msg = b"hello";
        let sig = sign(&sk, msg);
        assert!(!verify(&other_pk, msg, &sig));
    }

    #[test]
    fn corrupted_signature_fails() {
        let (sk, pk) = generate_keypair();
        let msg = b"hello";
        let mut sig = sign(&sk, msg);
        sig[0] ^= 0xFF;
        assert!(!verify(&pk, msg, &sig));
    }

    #[test]
    fn pem_roundtrip_preserves_signing() {
        let (sk, pk) = generate_keypair();
        let sk_pem = sk.to_pem().unwrap();
        let pk_pem = pk.to_pem().unwrap();
        let sk2 = PrivateKey::from_pem(&sk_pem).unwrap();
        let pk2 = PublicKey::from_pem(&pk_pem).unwrap();
        let msg = b"roundtrip";
        let sig = sign(&sk2, msg);
        assert!(verify(&pk2, msg, &sig));
    }
}
