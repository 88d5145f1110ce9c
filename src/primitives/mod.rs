pub mod block;
pub mod transaction;

pub use block::{Block, BlockMiningParams, GenesisAlloc, GenesisDeclaration};
pub use transaction::Transaction;
