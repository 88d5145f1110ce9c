// Chain: the append-only block store plus the head cursor. Owns the
// validate-and-apply pipeline that moves `WorldState` forward one
// block at a time, including the rollback path when a block turns out
// invalid partway through. Lives in its own RocksDB instance (see
// `Config::chain_db`) — a different engine from the world-state store.
use std::path::Path;
use std::sync::Arc;

use rocksdb::DB;

use crate::crypto::keys::Address;
use crate::error::BlockError;
use crate::pow;
use crate::primitives::{Block, GenesisDeclaration, Transaction};
use crate::state::WorldState;

const HEIGHT_KEY: &str = "height";

fn block_key(n: u64) -> String {
    format!("blk-{n}")
}

pub struct Chain {
    db: Arc<DB>,
    head: Option<Block>,
    pub genesis: Option<GenesisDeclaration>,
}

impl Chain {
    /// Opens the store. If a genesis block is present, the head is
    /// loaded from `height`; otherwise the chain comes back
    /// uninitialised and the caller is expected to call
    /// [`Self::create_new`].
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let db = Arc::new(DB::open_default(path)?);
        let mut chain = Chain { db, head: None, genesis: None };
        if let Some(genesis_bytes) = chain.db.get(block_key(1).as_bytes())? {
            let genesis: Block = serde_json::from_slice(&genesis_bytes)?;
            chain.genesis = Some(serde_json::from_str(&genesis.data)?);
            let height = chain.read_height()?;
            let head_bytes = chain
                .db
                .get(block_key(height).as_bytes())?
                .ok_or(crate::error::Error::Node(crate::error::NodeError::GenesisMissing))?;
            chain.head = Some(serde_json::from_slice(&head_bytes)?);
        }
        Ok(chain)
    }

    fn read_height(&self) -> crate::error::Result<u64> {
        match self.db.get(HEIGHT_KEY.as_bytes())? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).parse().unwrap_or(1)),
            None => Ok(1),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.head.is_some()
    }

    pub fn head(&self) -> Option<&Block> {
        self.head.as_ref()
    }

    pub fn height(&self) -> u64 {
        self.head.as_ref().map(|b| b.number).unwrap_or(0)
    }

    pub fn get_block(&self, n: u64) -> crate::error::Result<Option<Block>> {
        match self.db.get(block_key(n).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes `genesis_block` as the chain's first entry and makes it
    /// the head.
    pub fn create_new(&mut self, genesis_block: Block) -> crate::error::Result<()> {
        self.genesis = Some(serde_json::from_str(&genesis_block.data)?);
        self.db.put(block_key(1).as_bytes(), serde_json::to_vec(&genesis_block)?)?;
        self.db.put(HEIGHT_KEY.as_bytes(), b"1")?;
        self.head = Some(genesis_block);
        Ok(())
    }

    /// Writes `height <- n` and reloads the head, invoking `new_head`
    /// with the freshly loaded block.
    pub fn change_head(&mut self, n: u64, new_head: impl FnOnce(&Block)) -> crate::error::Result<()> {
        self.db.put(HEIGHT_KEY.as_bytes(), n.to_string().as_bytes())?;
        let block = self.get_block(n)?.ok_or(BlockError::BadNumber { number: n })?;
        new_head(&block);
        self.head = Some(block);
        Ok(())
    }

    /// Builds a candidate for the next block: parent and state hashes
    /// pinned to the current head, body empty (the caller fills it in
    /// from the mempool before mining), `reward`/`difficulty`
    /// inherited from genesis.
    pub fn create_candidate_block(&self, coinbase: Address, timestamp: u64) -> crate::error::Result<Block> {
        let head = self.head.as_ref().ok_or(crate::error::NodeError::GenesisMissing)?;
        let genesis = self.genesis.as_ref().ok_or(crate::error::NodeError::GenesisMissing)?;
        Ok(Block::candidate(
            head.number + 1,
            head.id.clone(),
            head.state_hash.clone(),
            vec![],
            coinbase,
            genesis.block_mining.placeholder_data.clone(),
            timestamp,
            genesis.block_mining.reward,
            genesis.block_mining.difficulty,
        ))
    }

    /// Runs bounded proof-of-work over `block`'s mining hash, starting
    /// at nonce zero, returning the finalised block.
    pub fn mine(&self, block: Block, max_rounds: u64) -> crate::error::Result<Block> {
        let mining_hash = block.mining_hash();
        match pow::mine(block.difficulty, &mining_hash, 0, max_rounds) {
            Some((nonce, _candidate)) => Ok(block.with_nonce(nonce)),
            None => Err(crate::error::BlockError::MiningFailed.into()),
        }
    }

    /// Dispatches to `apply_genesis` or `apply_next` depending on
    /// `block.number`, and on success advances the head.
    pub fn apply_block(
        &mut self,
        block: Block,
        state: &mut WorldState,
        new_head: impl FnOnce(&Block),
    ) -> crate::error::Result<()> {
        if block.number == 1 {
            self.apply_genesis(block, state, new_head)
        } else {
            self.apply_next(block, state, new_head)
        }
    }

    fn apply_genesis(
        &mut self,
        block: Block,
        state: &mut WorldState,
        new_head: impl FnOnce(&Block),
    ) -> crate::error::Result<()> {
        let committed = state.from_genesis(&block, true)?;
        if committed != block.state_hash {
            return Err(BlockError::ApplyFailed { number: 1, reason: "state_hash mismatch after genesis seeding".to_string() }.into());
        }
        self.create_new(block)?;
        self.change_head(1, new_head)?;
        Ok(())
    }

    fn apply_next(
        &mut self,
        block: Block,
        state: &mut WorldState,
        new_head: impl FnOnce(&Block),
    ) -> crate::error::Result<()> {
        let head = self.head.as_ref().ok_or(crate::error::NodeError::GenesisMissing)?.clone();
        let genesis = self.genesis.clone().ok_or(crate::error::NodeError::GenesisMissing)?;

        if block.parent_hash != head.id {
            return Err(BlockError::ChainViolated { number: block.number }.into());
        }
        if block.timestamp <= head.timestamp {
            return Err(BlockError::BadTime { number: block.number }.into());
        }
        if block.difficulty != genesis.block_mining.difficulty {
            return Err(BlockError::BadDifficulty { number: block.number }.into());
        }
        if block.number != head.number + 1 {
            return Err(BlockError::BadNumber { number: block.number }.into());
        }
        if !block.tx_hash_is_consistent() {
            return Err(BlockError::BadTxHash { number: block.number }.into());
        }
        if !pow::verify(block.difficulty, &block.mining_hash(), block.nonce, &block.id) {
            return Err(BlockError::BadPoW { number: block.number }.into());
        }

        let prev = state.new_block(block.number)?;

        if let Err(e) = apply_body(state, &block.body) {
            state.rollback_block(prev)?;
            return Err(BlockError::ApplyFailed { number: block.number, reason: e.to_string() }.into());
        }

        if let Err(e) = state.incr_balance(&block.coinbase, block.reward) {
            state.rollback_block(prev)?;
            return Err(e);
        }
        let committed = match state.commit() {
            Ok(h) => h,
            Err(e) => {
                state.rollback_block(prev)?;
                return Err(e);
            }
        };

        if committed != block.state_hash {
            state.rollback_block(prev)?;
            return Err(BlockError::ApplyFailed { number: block.number, reason: "state_hash mismatch".to_string() }.into());
        }

        let number = block.number;
        self.db.put(block_key(number).as_bytes(), serde_json::to_vec(&block)?)?;
        self.change_head(number, new_head)?;
        Ok(())
    }
}

fn apply_body(state: &mut WorldState, body: &[Transaction]) -> crate::error::Result<()> {
    state.apply_txns(body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::generate_keypair;
    use crate::primitives::{BlockMiningParams, GenesisAlloc};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static CTR: AtomicU64 = AtomicU64::new(0);

    fn tmp_path(label: &str) -> PathBuf {
        let id = CTR.fetch_add(1, Ordering::SeqCst);
        let p = PathBuf::from(format!("/tmp/corechain_{label}_{}_{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&p);
        p
    }

    fn genesis_declaration(miner: &str, balance: u64) -> GenesisDeclaration {
        GenesisDeclaration {
            network_id: "test-net".to_string(),
            max_peers: 8,
            miners: vec![miner.to_string()],
            block_mining: BlockMiningParams {
                interval: 5,
                max_bound: 100,
                min_bound: 0,
                reward: 50,
                difficulty: 1,
                allow_empty: true,
                placeholder_data: "genesis-pad".to_string(),
            },
            alloc: BTreeMap::from([(miner.to_string(), GenesisAlloc { balance, nonce: 0 })]),
        }
    }

    fn bootstrapped(miner: &str, balance: u64) -> (Chain, WorldState) {
        let mut state = WorldState::open(&tmp_path("state")).unwrap();
        let mut chain = Chain::load(&tmp_path("chain")).unwrap();
        assert!(!chain.is_initialized());

        let decl = genesis_declaration(miner, balance);
        let state_hash = state.from_genesis(
            &Block::candidate(
                1,
                crate::crypto::hash::BLANK_SHA_256.to_string(),
                crate::crypto::hash::BLANK_SHA_256.to_string(),
                vec![],
                miner.to_string(),
                serde_json::to_string(&decl).unwrap(),
                0,
                0,
                1,
            ),
            false,
        ).unwrap();

        let genesis_candidate = Block::candidate(
            1,
            crate::crypto::hash::BLANK_SHA_256.to_string(),
            state_hash,
            vec![],
            miner.to_string(),
            serde_json::to_string(&decl).unwrap(),
            0,
            0,
            1,
        );
        let mined = chain.mine(genesis_candidate, 1_000_000).unwrap();
        chain.apply_block(mined, &mut state, |_| {}).unwrap();
        (chain, state)
    }

    #[test]
    fn genesis_bootstraps_chain_and_state() {
        let (chain, mut state) = bootstrapped("miner-addr", 1_000);
        assert_eq!(chain.height(), 1);
        let acc = state.account_state("miner-addr", false).unwrap().unwrap();
        assert_eq!(acc.balance, 1_000);
    }

    #[test]
    fn apply_next_extends_chain_and_credits_coinbase() {
        let (mut chain, mut state) = bootstrapped("miner-addr", 1_000);

        let mut candidate = chain.create_candidate_block("miner-addr".to_string(), 1_700_000_001).unwrap();

        // `apply_next` will run new_block -> apply body (empty) -> credit
        // coinbase -> commit, and compare the result against
        // `candidate.state_hash`. Run that same sequence once here to learn
        // what the resulting digest will be, then roll it back so the real
        // apply starts from a clean, uncommitted height again.
        let prev = state.new_block(candidate.number).unwrap();
        state.incr_balance(&candidate.coinbase, candidate.reward).unwrap();
        let expected_hash = state.commit().unwrap();
        state.rollback_block(prev).unwrap();
        candidate.state_hash = expected_hash;

        let mined = chain.mine(candidate, 1_000_000).unwrap();
        chain.apply_block(mined, &mut state, |_| {}).unwrap();

        assert_eq!(chain.height(), 2);
        let acc = state.account_state("miner-addr", false).unwrap().unwrap();
        assert_eq!(acc.balance, 1_050);
    }

    #[test]
    fn apply_next_rejects_wrong_parent_hash() {
        let (mut chain, mut state) = bootstrapped("miner-addr", 1_000);
        let mut candidate = chain.create_candidate_block("miner-addr".to_string(), 1_700_000_001).unwrap();
        candidate.parent_hash = "not-the-real-parent".to_string();
        let mined = chain.mine(candidate, 1_000_000).unwrap();
        assert!(matches!(
            chain.apply_block(mined, &mut state, |_| {}),
            Err(crate::error::Error::Block(BlockError::ChainViolated { .. }))
        ));
    }

    #[test]
    fn apply_next_rejects_wrong_block_number() {
        let (mut chain, mut state) = bootstrapped("miner-addr", 1_000);
        let mut candidate = chain.create_candidate_block("miner-addr".to_string(), 1_700_000_001).unwrap();
        candidate.number = 99;
        let mined = chain.mine(candidate, 1_000_000).unwrap();
        assert!(matches!(
            chain.apply_block(mined, &mut state, |_| {}),
            Err(crate::error::Error::Block(BlockError::BadNumber { .. }))
        ));
    }
}
