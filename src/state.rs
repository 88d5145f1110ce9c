// World state: per-account balances and nonces, snapshotted per block
// height so a failed apply can be rolled back without touching the
// chain store. Lives in its own RocksDB instance (see `Config::state_db`) —
// a deliberate split from the chain store so the two can be compacted,
// backed up, and reasoned about independently.
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{WriteBatch, DB};

use crate::crypto::hash::hash_map;
use crate::crypto::keys::Address;
use crate::error::TxError;
use crate::primitives::{Block, GenesisDeclaration, Transaction};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
}

const HASH_STATE_KEY: &str = "hash_state";

fn account_key(height: u64, addr: &str) -> String {
    format!("worldstate.blk-{height}:account-{addr}")
}

fn block_prefix(height: u64) -> String {
    format!("worldstate.blk-{height}:")
}

pub struct WorldState {
    db: Arc<DB>,
    height: u64,
    cache: HashMap<Address, AccountState>,
    dirty: HashSet<Address>,
}

impl WorldState {
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let db = DB::open_default(path)?;
        Ok(WorldState { db: Arc::new(db), height: 1, cache: HashMap::new(), dirty: HashSet::new() })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Reads an account, consulting the in-memory cache first. With
    /// `create = true`, a missing account is manufactured zeroed and
    /// cached (but not marked dirty until actually mutated).
    pub fn account_state(&mut self, addr: &str, create: bool) -> crate::error::Result<Option<AccountState>> {
        if let Some(acc) = self.cache.get(addr) {
            return Ok(Some(acc.clone()));
        }
        let key = account_key(self.height, addr);
        let stored = self.db.get(key.as_bytes())?;
        let account = match stored {
            Some(bytes) => Some(serde_json::from_slice::<AccountState>(&bytes)?),
            None if create => Some(AccountState::default()),
            None => None,
        };
        if let Some(ref acc) = account {
            self.cache.insert(addr.to_string(), acc.clone());
        }
        Ok(account)
    }

    fn mutate(&mut self, addr: &str, f: impl FnOnce(&mut AccountState)) -> crate::error::Result<()> {
        self.account_state(addr, true)?;
        let acc = self.cache.get_mut(addr).expect("just inserted by account_state");
        f(acc);
        self.dirty.insert(addr.to_string());
        Ok(())
    }

    pub fn set_balance(&mut self, addr: &str, balance: u64) -> crate::error::Result<()> {
        self.mutate(addr, |a| a.balance = balance)
    }

    pub fn incr_balance(&mut self, addr: &str, delta: u64) -> crate::error::Result<()> {
        self.mutate(addr, |a| a.balance = a.balance.saturating_add(delta))
    }

    pub fn set_nonce(&mut self, addr: &str, nonce: u64) -> crate::error::Result<()> {
        self.mutate(addr, |a| a.nonce = nonce)
    }

    pub fn incr_nonce(&mut self, addr: &str) -> crate::error::Result<()> {
        self.mutate(addr, |a| a.nonce += 1)
    }

    /// Advances the height cursor from `h_prev` (the current height)
    /// to `h`, copying every `blk-{h_prev}:*` entry to `blk-{h}:*` in
    /// one atomic batch. Returns the previous height, so the caller
    /// can pass it straight to [`Self::rollback_block`] on failure.
    pub fn new_block(&mut self, h: u64) -> crate::error::Result<u64> {
        let h_prev = self.height;
        let mut batch = WriteBatch::default();
        let prefix = block_prefix(h_prev);
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let suffix = &key[prefix.len()..];
            let mut new_key = block_prefix(h).into_bytes();
            new_key.extend_from_slice(suffix);
            batch.put(new_key, value);
        }
        self.db.write(batch)?;
        self.height = h;
        Ok(h_prev)
    }

    /// The delete half of rollback: removes every `blk-{h}:*` entry.
    pub fn clear_block(&mut self, h: u64) -> crate::error::Result<()> {
        let mut batch = WriteBatch::default();
        let prefix = block_prefix(h);
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            batch.delete(key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Reverts an aborted apply: deletes the invalid snapshot at the
    /// current height and moves the cursor back to `h_prev`.
    pub fn rollback_block(&mut self, h_prev: u64) -> crate::error::Result<()> {
        let invalid = self.height;
        self.clear_block(invalid)?;
        self.height = h_prev;
        self.cache.clear();
        self.dirty.clear();
        Ok(())
    }

    /// A shadow-height clone for pre-mining validation: shares the
    /// underlying store but commits land at `shadow_height` instead of
    /// the live one, so speculative application never touches
    /// committed state.
    pub fn candidate_state(&self, shadow_height: u64) -> Self {
        WorldState { db: Arc::clone(&self.db), height: shadow_height, cache: HashMap::new(), dirty: HashSet::new() }
    }

    /// Writes every dirty cache entry to `blk-{height}:*`, recomputes
    /// `hash_state` over every entry at that height, and persists it.
    /// Returns the new digest.
    pub fn commit(&mut self) -> crate::error::Result<String> {
        let mut batch = WriteBatch::default();
        for addr in &self.dirty {
            let acc = &self.cache[addr];
            let key = account_key(self.height, addr);
            batch.put(key.as_bytes(), serde_json::to_vec(acc)?);
        }
        self.db.write(batch)?;
        self.dirty.clear();

        let prefix = block_prefix(self.height);
        let mut entries = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            entries.push((String::from_utf8_lossy(&key).into_owned(), String::from_utf8_lossy(&value).into_owned()));
        }
        let digest = hash_map(&entries);
        self.db.put(HASH_STATE_KEY.as_bytes(), digest.as_bytes())?;
        Ok(digest)
    }

    pub fn hash_state(&self) -> crate::error::Result<String> {
        match self.db.get(HASH_STATE_KEY.as_bytes())? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Ok(crate::crypto::hash::BLANK_SHA_256.to_string()),
        }
    }

    /// Applies a single transaction: verifies its signature, checks
    /// nonce and balance, then moves value from sender to recipient
    /// and commits. Leaves no partial state on error — callers running
    /// a batch are expected to roll the enclosing block snapshot back.
    pub fn apply_txn(&mut self, tx: &Transaction) -> crate::error::Result<String> {
        tx.verify()?;

        let sender_addr = tx.sender();
        let sender = self
            .account_state(&sender_addr, false)?
            .ok_or_else(|| TxError::BadNonce { txid: tx.id.clone(), expected: 0, got: tx.nonce })?;
        if sender.nonce != tx.nonce {
            return Err(TxError::BadNonce { txid: tx.id.clone(), expected: sender.nonce, got: tx.nonce }.into());
        }
        if sender.balance < tx.amount {
            return Err(TxError::OutOfFunds { txid: tx.id.clone() }.into());
        }

        if let Some(recipient) = tx.recipient.clone() {
            self.mutate(&recipient, |a| a.balance = a.balance.saturating_add(tx.amount))?;
        }
        self.mutate(&sender_addr, |a| {
            a.nonce += 1;
            a.balance -= tx.amount;
        })?;

        self.commit()
    }

    /// Applies every transaction in order, aborting on the first
    /// failure — the caller decides what rollback means at the block
    /// level.
    pub fn apply_txns(&mut self, txs: &[Transaction]) -> crate::error::Result<String> {
        let mut last = self.hash_state()?;
        for tx in txs {
            last = self.apply_txn(tx)?;
        }
        Ok(last)
    }

    /// Seeds balances from a genesis block's `alloc` declaration.
    pub fn from_genesis(&mut self, block: &Block, commit: bool) -> crate::error::Result<String> {
        let decl: GenesisDeclaration = serde_json::from_str(&block.data)?;
        for (addr, alloc) in &decl.alloc {
            self.set_balance(addr, alloc.balance)?;
            self.set_nonce(addr, alloc.nonce)?;
        }
        if commit {
            self.commit()
        } else {
            self.hash_state()
        }
    }
}
