//! Proof-of-work search and validation.
//!
//! `valid_proof` is the only predicate: the serial search, the parallel search, and
//! chain validation during reconciliation all go through it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use super::block::{canonical_hash, Hash};
use super::transaction::Transaction;

/// Required count of leading zero hex characters in a mined block's proof hash
pub const MINING_DIFFICULTY: usize = 3;

/// Amount credited to the miner for each block
pub const MINING_REWARD: f64 = 1.0;

/// Counts leading `'0'` characters in the hex rendering of `hash`
fn leading_zero_nibbles(hash: &Hash) -> usize {
    let mut zeros = 0;
    for byte in hash {
        if *byte == 0 {
            zeros += 2;
            continue;
        }
        if byte >> 4 == 0 {
            zeros += 1;
        }
        break;
    }
    zeros
}

/// True iff the pinned-timestamp hash of the candidate block has at least
/// `difficulty` leading zero hex characters.
pub fn valid_proof(
    nonce: u64,
    previous_hash: &Hash,
    transactions: &[Transaction],
    difficulty: usize,
) -> bool {
    let guess = canonical_hash(nonce, previous_hash, 0, transactions);
    leading_zero_nibbles(&guess) >= difficulty
}

/// Brute-force search from nonce 0 upwards.
///
/// Returns `None` only if `cancel` is raised before a nonce is found.
pub fn proof_of_work(
    previous_hash: &Hash,
    transactions: &[Transaction],
    difficulty: usize,
    cancel: &AtomicBool,
) -> Option<u64> {
    let mut nonce = 0u64;
    while !valid_proof(nonce, previous_hash, transactions, difficulty) {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        nonce = nonce.wrapping_add(1);
    }
    Some(nonce)
}

/// Splits the nonce space by stride across `workers` threads.
///
/// Worker `i` tries `i, i + workers, i + 2 * workers, ...`. The first worker to find a
/// nonce raises the shared `found` flag and the rest stop. With one worker this is
/// exactly `proof_of_work`.
pub fn parallel_proof_of_work(
    previous_hash: &Hash,
    transactions: &[Transaction],
    difficulty: usize,
    workers: usize,
    cancel: &AtomicBool,
) -> Option<u64> {
    if workers <= 1 {
        return proof_of_work(previous_hash, transactions, difficulty, cancel);
    }

    let found = AtomicBool::new(false);
    let winner = AtomicU64::new(0);
    let stride = workers as u64;

    thread::scope(|scope| {
        for worker in 0..stride {
            let found = &found;
            let winner = &winner;
            scope.spawn(move || {
                let mut nonce = worker;
                loop {
                    if found.load(Ordering::Acquire) || cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    if valid_proof(nonce, previous_hash, transactions, difficulty) {
                        if found
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            winner.store(nonce, Ordering::Release);
                        }
                        return;
                    }
                    nonce = nonce.wrapping_add(stride);
                }
            });
        }
    });

    if found.load(Ordering::Acquire) {
        Some(winner.load(Ordering::Acquire))
    } else {
        None
    }
}
