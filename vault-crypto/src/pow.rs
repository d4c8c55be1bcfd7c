//! The wallet-unlock proof-of-work.
//!
//! A locked wallet's card hands out `{card_nonce, target}`; the device must
//! find the smallest little-endian counter `n` such that
//! `SHA256(card_nonce ‖ n)` meets the target. "Meets" compares the first 16
//! digest bytes against the 16-byte target, lexicographically.
//!
//! The solver runs in bounded batches so the caller can poll the event bus
//! between batches and abandon the work on a P0.

use thiserror::Error;
use vault_common::{constants::POW_NONCE_LEN, sha256};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum PowError {
    /// An all-zero target can never be met by a fresh digest; the loop
    /// would spin forever. Rejected up front.
    #[error("proof-of-work target is unsatisfiable")]
    UnsatisfiableTarget,
}

/// The challenge handed out by the locking card.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PowChallenge {
    pub card_nonce: [u8; POW_NONCE_LEN],
    pub target: [u8; POW_NONCE_LEN],
}

/// Does `digest` meet `target`? First 16 digest bytes vs the target,
/// lexicographic.
pub fn meets_target(
    digest: &[u8; sha256::OUTPUT_LEN],
    target: &[u8; POW_NONCE_LEN],
) -> bool {
    digest[..POW_NONCE_LEN] <= target[..]
}

/// Incremental solver state. Deterministic: the same challenge always
/// yields the same solution, the smallest satisfying counter.
pub struct PowSolver {
    challenge: PowChallenge,
    counter: u128,
}

impl PowSolver {
    pub fn new(challenge: PowChallenge) -> Result<Self, PowError> {
        if challenge.target == [0u8; POW_NONCE_LEN] {
            return Err(PowError::UnsatisfiableTarget);
        }
        Ok(Self {
            challenge,
            counter: 0,
        })
    }

    /// Try up to `batch` counter values; `Some(solution)` once found.
    ///
    /// Callers loop over this, polling for aborts in between.
    pub fn run_batch(&mut self, batch: u32) -> Option<[u8; POW_NONCE_LEN]> {
        for _ in 0..batch {
            let nonce = self.counter.to_le_bytes();
            let digest =
                sha256::digest_many(&[&self.challenge.card_nonce, &nonce]);
            if meets_target(&digest, &self.challenge.target) {
                return Some(nonce);
            }
            self.counter = self.counter.wrapping_add(1);
        }
        None
    }

    /// Counter values tried so far, for progress display.
    pub fn attempts(&self) -> u128 {
        self.counter
    }
}

/// Verify a claimed solution against a challenge, as the card would.
pub fn verify(challenge: &PowChallenge, solution: &[u8; POW_NONCE_LEN]) -> bool {
    let digest = sha256::digest_many(&[&challenge.card_nonce, solution]);
    meets_target(&digest, &challenge.target)
}
