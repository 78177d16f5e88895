use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::Identity;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id:         Uuid,
    pub seed:       String,   // hex
    pub difficulty: u8,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSolution {
    pub puzzle_id: Uuid,
    pub nonce:     u64,
}

pub(crate) struct IssuedPuzzle {
    pub identity:   Identity,
    pub seed:       [u8; 16],
    pub difficulty: u8,
}

/// SHA-256(seed ‖ identity ‖ nonce_le)
pub fn work_hash(seed: &[u8], identity: &Identity, nonce: u64) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(seed);
    h.update(identity.as_str().as_bytes());
    h.update(nonce.to_le_bytes());
    h.finalize().into()
}

pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for b in hash {
        if *b == 0 {
            bits += 8;
        } else {
            bits += b.leading_zeros();
            break;
        }
    }
    bits
}

pub(crate) fn meets_target(seed: &[u8], identity: &Identity, nonce: u64, difficulty: u8) -> bool {
    leading_zero_bits(&work_hash(seed, identity, nonce)) >= u32::from(difficulty)
}

impl Puzzle {
    fn seed_bytes(&self) -> Option<Vec<u8>> { hex::decode(&self.seed).ok() }

    pub fn check(&self, identity: &Identity, nonce: u64) -> bool {
        self.seed_bytes()
            .is_some_and(|seed| meets_target(&seed, identity, nonce, self.difficulty))
    }

    /// Brute-force search, the client's half of the protocol.
    pub fn solve(&self, identity: &Identity, max_iters: u64) -> Option<WorkSolution> {
        let seed = self.seed_bytes()?;
        (0..max_iters)
            .find(|n| meets_target(&seed, identity, *n, self.difficulty))
            .map(|nonce| WorkSolution { puzzle_id: self.id, nonce })
    }
}
