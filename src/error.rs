//! Semantic error kinds. Every failure from the design is an explicit
//! variant here rather than a panic or a bare `String` — call sites
//! pattern-match on these instead of unwinding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected message tag {found:?}, expected {expected:?}")]
    BadTag { expected: &'static str, found: [u8; 3] },
    #[error("malformed binary map: {0}")]
    BadMap(&'static str),
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("transaction {txid} has no signature")]
    NotSigned { txid: String },
    #[error("transaction {txid} has a signature that does not verify")]
    BadSignature { txid: String },
    #[error("transaction {txid} has nonce {got}, expected {expected}")]
    BadNonce { txid: String, expected: u64, got: u64 },
    #[error("transaction {txid}: sender balance cannot cover amount")]
    OutOfFunds { txid: String },
}

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {number} parent_hash does not match chain head")]
    ChainViolated { number: u64 },
    #[error("block {number} timestamp is not after the head's")]
    BadTime { number: u64 },
    #[error("block {number} difficulty does not match genesis difficulty")]
    BadDifficulty { number: u64 },
    #[error("block {number} is not head.number + 1")]
    BadNumber { number: u64 },
    #[error("block {number} tx_hash does not match its body")]
    BadTxHash { number: u64 },
    #[error("block {number} failed proof-of-work verification")]
    BadPoW { number: u64 },
    #[error("block {number} failed to apply: {reason}")]
    ApplyFailed { number: u64, reason: String },
    #[error("mining exhausted its round budget without finding a valid nonce")]
    MiningFailed,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no account key pair found at the configured key directory")]
    AccountMissing,
    #[error("no genesis block found in the chain store")]
    GenesisMissing,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request {request_id} to {peer} timed out")]
    Timeout { request_id: u64, peer: String },
    #[error("received a message this node does not support: {0}")]
    UnsupportedMessage(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("key error: {0}")]
    Key(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
