// Transaction Mempool
//
// A priority queue of pending transactions ordered ascending by
// `(sender, nonce, insertion_counter)`. The counter breaks ties between
// equal `(sender, nonce)` keys first-in-first-out; there is no fee
// concept and no Replace-by-Fee — the mempool is a pure ordering
// structure, admission rules live in `Transaction::verify` and `WorldState`.
use std::collections::BTreeMap;

use crate::primitives::Transaction;

type Key = (String, u64, u64);

#[derive(Debug, Default)]
pub struct Mempool {
    entries: BTreeMap<Key, Transaction>,
    counter: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool { entries: BTreeMap::new(), counter: 0 }
    }

    /// Pushes `tx` under key `(tx.sender(), tx.nonce, counter)`, then
    /// increments the counter.
    pub fn add(&mut self, tx: Transaction) {
        let key = (tx.sender(), tx.nonce, self.counter);
        self.counter += 1;
        self.entries.insert(key, tx);
    }

    /// Removes and returns the transaction with the least key.
    pub fn pop(&mut self) -> Option<Transaction> {
        let key = self.entries.keys().next().cloned()?;
        self.entries.remove(&key)
    }

    /// Returns up to `n` transactions in key order without removing them.
    pub fn peek(&self, n: usize) -> Vec<Transaction> {
        self.entries.values().take(n).cloned().collect()
    }

    /// A new mempool with `txs` removed by id, preserving the relative
    /// order and counters of everything that remains. Used when a
    /// block is adopted and its body must be dropped from the pool.
    pub fn diff(&self, txs: &[Transaction]) -> Mempool {
        let adopted: std::collections::HashSet<&str> = txs.iter().map(|t| t.id.as_str()).collect();
        let entries = self
            .entries
            .iter()
            .filter(|(_, tx)| !adopted.contains(tx.id.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Mempool { entries, counter: self.counter }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
