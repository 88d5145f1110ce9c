// Data Structures: Block
use super::transaction::{tx_list_hash, Transaction};
use crate::crypto::hash::{digest, BLANK_SHA_256};
use crate::crypto::keys::Address;

/// A block header plus its ordered transaction body.
///
/// `mining_hash` binds everything except the nonce; `id` binds the
/// nonce on top, so a block's identity only settles once a
/// proof-of-work round has found an accepted nonce for it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub id: String,
    pub number: u64,
    pub parent_hash: String,
    pub state_hash: String,
    pub tx_hash: String,
    pub body: Vec<Transaction>,
    pub coinbase: Address,
    pub data: String,
    pub nonce: u64,
    pub timestamp: u64,
    pub reward: u64,
    pub difficulty: u32,
}

impl Block {
    /// Constructs a candidate block: every field except `nonce` and
    /// `id` settled, `tx_hash` derived from `body`. The caller still
    /// needs to run proof-of-work (see [`crate::pow`]) before the
    /// block is fit to extend the chain.
    #[allow(clippy::too_many_arguments)]
    pub fn candidate(
        number: u64,
        parent_hash: String,
        state_hash: String,
        body: Vec<Transaction>,
        coinbase: Address,
        data: String,
        timestamp: u64,
        reward: u64,
        difficulty: u32,
    ) -> Self {
        let tx_hash = tx_list_hash(&body);
        Block {
            id: String::new(),
            number,
            parent_hash,
            state_hash,
            tx_hash,
            body,
            coinbase,
            data,
            nonce: 0,
            timestamp,
            reward,
            difficulty,
        }
    }

    /// The hash proof-of-work is performed against: everything that
    /// must be fixed before mining starts.
    pub fn mining_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}{}",
            self.number, self.parent_hash, self.state_hash, self.tx_hash, self.timestamp, self.data
        );
        digest(preimage.as_bytes())
    }

    /// Finalizes the block with a proof-of-work nonce, computing `id`.
    /// Does not itself verify the nonce is valid for `difficulty` —
    /// callers go through [`crate::pow::mine`] or [`crate::pow::verify`]
    /// for that.
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        let preimage = format!("{}{}", nonce, self.mining_hash());
        self.id = digest(preimage.as_bytes());
        self
    }

    /// Whether `body` actually hashes to `tx_hash` — the invariant a
    /// received block must satisfy before it can be applied.
    pub fn tx_hash_is_consistent(&self) -> bool {
        tx_list_hash(&self.body) == self.tx_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 1 && self.parent_hash == BLANK_SHA_256
    }
}

/// Block-production parameters carried in a genesis declaration:
/// how often and under what bounds the leader mines a new block.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockMiningParams {
    pub interval: u64,
    pub max_bound: usize,
    pub min_bound: usize,
    pub reward: u64,
    pub difficulty: u32,
    pub allow_empty: bool,
    pub placeholder_data: String,
}

/// An account's seeded balance and nonce at genesis.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct GenesisAlloc {
    pub balance: u64,
    #[serde(default)]
    pub nonce: u64,
}

/// The JSON shape a genesis declaration is authored in (see
/// [`crate::genesis`]), kept here because it shares the block's data
/// model rather than introducing a parallel one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenesisDeclaration {
    pub network_id: String,
    pub max_peers: u32,
    pub miners: Vec<Address>,
    pub block_mining: BlockMiningParams,
    pub alloc: std::collections::BTreeMap<Address, GenesisAlloc>,
}
