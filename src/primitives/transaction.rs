// Data Structures: Transaction
use crate::crypto::hash::digest;
use crate::crypto::keys::{Address, ADDRESS_HEX_LEN};
use crate::crypto::signer::{sign as rsa_sign, verify as rsa_verify, PrivateKey, PublicKey};
use crate::error::TxError;

/// Wire form of a public key — DER hex, so `Transaction` can serialize
/// without round-tripping through PEM.
pub type PublicKeyBytes = String;

/// A transfer of value (and optional opaque payload) between two accounts.
///
/// `id` and `signature` are computed over every other field; the sender's
/// public key travels with the transaction so a verifier never needs a
/// separate lookup to check it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub id: String,
    pub nonce: u64,
    pub sender_pubkey: PublicKeyBytes,
    pub recipient: Option<Address>,
    pub amount: u64,
    pub data: Option<Vec<u8>>,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Builds and signs a transaction. `id` and `signature` are computed
    /// here and never mutated afterwards.
    pub fn new(
        nonce: u64,
        sk: &PrivateKey,
        recipient: Option<Address>,
        amount: u64,
        data: Option<Vec<u8>>,
        timestamp: u64,
    ) -> Self {
        let pk = sk.public_key();
        let mut tx = Transaction {
            id: String::new(),
            nonce,
            sender_pubkey: pk.to_hex(),
            recipient,
            amount,
            data,
            timestamp,
            signature: Vec::new(),
        };
        let preimage = tx.canonical_bytes();
        tx.id = digest(&preimage);
        tx.signature = rsa_sign(sk, &preimage);
        tx
    }

    /// The sender's address, derived from the embedded public key.
    pub fn sender(&self) -> Address {
        self.sender_pubkey.chars().take(ADDRESS_HEX_LEN).collect()
    }

    /// The sorted `(field, value)` pairs `id` and the signature are
    /// computed over. Excludes `id` and `signature` themselves.
    fn canonical_fields(&self) -> Vec<(String, String)> {
        vec![
            ("nonce".to_string(), self.nonce.to_string()),
            ("sender".to_string(), self.sender_pubkey.clone()),
            ("recipient".to_string(), self.recipient.clone().unwrap_or_default()),
            ("amount".to_string(), self.amount.to_string()),
            ("data".to_string(), self.data.as_deref().map(hex::encode).unwrap_or_default()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ]
    }

    /// The exact bytes `id` is a digest of, and the exact bytes the
    /// signature covers. Sorted the same way [`crate::crypto::hash::hash_map`]
    /// sorts its entries, so the two stay consistent.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut fields = self.canonical_fields();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields.iter().map(|(k, v)| format!("{k}{v}")).collect::<Vec<_>>().join("|").into_bytes()
    }

    fn recomputed_id(&self) -> String {
        digest(&self.canonical_bytes())
    }

    fn public_key(&self) -> crate::error::Result<PublicKey> {
        let der = hex::decode(&self.sender_pubkey)
            .map_err(|_| TxError::BadSignature { txid: self.id.clone() })?;
        PublicKey::from_der(&der).map_err(|_| TxError::BadSignature { txid: self.id.clone() }.into())
    }

    /// Validates structural integrity: `id` matches the canonical
    /// encoding and the signature verifies under the embedded sender
    /// key. Does not consult any state (balances, nonces) — that is
    /// `WorldState`'s job.
    pub fn verify(&self) -> crate::error::Result<()> {
        if self.signature.is_empty() {
            return Err(TxError::NotSigned { txid: self.id.clone() }.into());
        }
        if self.id != self.recomputed_id() {
            return Err(TxError::BadSignature { txid: self.id.clone() }.into());
        }
        let pk = self.public_key()?;
        if !rsa_verify(&pk, &self.canonical_bytes(), &self.signature) {
            return Err(TxError::BadSignature { txid: self.id.clone() }.into());
        }
        Ok(())
    }
}

/// Hash of a list of transaction ids, in list order — the basis of a
/// block's `tx_hash`. Order is significant, so ids are concatenated as
/// given rather than sorted the way [`crate::crypto::hash::hash_map`] would.
pub fn tx_list_hash(txs: &[Transaction]) -> String {
    if txs.is_empty() {
        return crate::crypto::hash::BLANK_SHA_256.to_string();
    }
    let concatenated: String = txs.iter().map(|tx| tx.id.as_str()).collect();
    digest(concatenated.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::generate_keypair;

    fn signed_tx(nonce: u64, amount: u64) -> Transaction {
        let (sk, _) = generate_keypair();
        Transaction::new(nonce, &sk, Some("recipient-address-hex".to_string()), amount, None, 1_700_000_000)
    }

    #[test]
    fn fresh_transaction_verifies() {
        let tx = signed_tx(1, 100);
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn tampering_with_amount_breaks_id() {
        let mut tx = signed_tx(1, 100);
        tx.amount = 999;
        assert!(tx.verify().is_err());
    }

    #[test]
    fn tampering_with_signature_fails_verification() {
        let mut tx = signed_tx(1, 100);
        tx.signature[0] ^= 0xFF;
        assert!(tx.verify().is_err());
    }

    #[test]
    fn unsigned_transaction_is_rejected() {
        let mut tx = signed_tx(1, 100);
        tx.signature.clear();
        assert!(matches!(
            tx.verify(),
            Err(crate::error::Error::Tx(TxError::NotSigned { .. }))
        ));
    }

    #[test]
    fn id_is_stable_if_signature_is_zeroed_out_after_the_fact() {
        let tx = signed_tx(5, 42);
        let mut tampered = tx.clone();
        tampered.signature = vec![0u8; tampered.signature.len()];
        assert_eq!(tx.id, tampered.id);
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn empty_tx_list_hashes_to_blank() {
        assert_eq!(tx_list_hash(&[]), crate::crypto::hash::BLANK_SHA_256);
    }

    #[test]
    fn tx_list_hash_is_order_sensitive() {
        let a = signed_tx(1, 1);
        let b = signed_tx(2, 2);
        let forward = tx_list_hash(&[a.clone(), b.clone()]);
        let backward = tx_list_hash(&[b, a]);
        assert_ne!(forward, backward);
    }
}
