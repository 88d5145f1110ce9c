// Genesis: turns a hand-authored declaration into the chain's first
// block. Any change to the declaration — a different miner set, a
// different alloc — changes the block's `data` and therefore its `id`,
// so two networks booted from different declarations can never be
// mistaken for the same chain.
use crate::chain::Chain;
use crate::crypto::hash::BLANK_SHA_256;
use crate::crypto::keys::Address;
use crate::primitives::{Block, GenesisDeclaration};
use crate::state::WorldState;

/// Builds, mines, and installs the genesis block described by `decl`.
/// `state` and `chain` must both be freshly opened and uninitialised.
pub fn bootstrap(
    decl: GenesisDeclaration,
    coinbase: Address,
    timestamp: u64,
    max_rounds: u64,
    state: &mut WorldState,
    chain: &mut Chain,
) -> crate::error::Result<Block> {
    let data = serde_json::to_string(&decl)?;
    let difficulty = decl.block_mining.difficulty;

    let unsealed = Block::candidate(1, BLANK_SHA_256.to_string(), BLANK_SHA_256.to_string(), vec![], coinbase.clone(), data.clone(), timestamp, 0, difficulty);
    let state_hash = state.from_genesis(&unsealed, false)?;

    let candidate = Block::candidate(1, BLANK_SHA_256.to_string(), state_hash, vec![], coinbase, data, timestamp, 0, difficulty);
    let mined = chain.mine(candidate, max_rounds)?;
    chain.apply_block(mined.clone(), state, |_| {})?;
    Ok(mined)
}
