// Proof-of-work: a bounded nonce search over a block's mining hash.
// Synchronous and interruptible only between rounds — mining a handful
// of leading-zero hex digits at this difficulty is cheap enough that a
// dedicated blocking thread pool buys nothing a round cap doesn't.
use crate::crypto::hash::digest;

/// Number of leading hex `'0'` characters `candidate_hash(nonce, mining_hash)`
/// must have to be accepted at the given difficulty.
pub fn candidate_hash(nonce: u64, mining_hash: &str) -> String {
    let preimage = format!("{nonce}{mining_hash}");
    digest(preimage.as_bytes())
}

pub fn is_valid(difficulty: u32, candidate: &str) -> bool {
    candidate.chars().take(difficulty as usize).all(|c| c == '0')
}

/// Searches nonces `start_nonce..start_nonce + max_rounds` for one whose
/// candidate hash satisfies `difficulty`. Returns the first hit, or
/// `None` if the round budget is exhausted first.
pub fn mine(difficulty: u32, mining_hash: &str, start_nonce: u64, max_rounds: u64) -> Option<(u64, String)> {
    for offset in 0..max_rounds {
        let nonce = start_nonce.wrapping_add(offset);
        let candidate = candidate_hash(nonce, mining_hash);
        if is_valid(difficulty, &candidate) {
            return Some((nonce, candidate));
        }
    }
    None
}

/// Verifies a claimed `(nonce, expected_candidate)` pair actually
/// satisfies `difficulty` against `mining_hash` — used when accepting
/// blocks mined by someone else.
pub fn verify(difficulty: u32, mining_hash: &str, nonce: u64, expected_candidate: &str) -> bool {
    let recomputed = candidate_hash(nonce, mining_hash);
    recomputed == expected_candidate && is_valid(difficulty, &recomputed)
}
