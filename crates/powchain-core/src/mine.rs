use crate::error::{LedgerError, Result};
use crate::pow::{self, nonce_at, seed_nonce, BlockTemplate, Difficulty, SearchBound};
use crate::{Block, Hash};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Sequential,
    /// Split the attempt range across the rayon pool.
    Parallel,
}

/// Everything a ledger needs to know to mine a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Miner {
    pub difficulty: Difficulty,
    pub bound: SearchBound,
    pub strategy: Strategy,
}

impl Miner {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn with_bound(mut self, bound: SearchBound) -> Self {
        self.bound = bound;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Mine from a freshly drawn seed.
    pub fn mine(&self, template: BlockTemplate) -> Result<Block> {
        self.mine_from(template, seed_nonce())
    }

    pub fn mine_from(&self, template: BlockTemplate, seed: i32) -> Result<Block> {
        match self.strategy {
            Strategy::Sequential => pow::mine(template, seed, self.difficulty, self.bound),
            Strategy::Parallel => mine_parallel(template, seed, self.difficulty, self.bound),
        }
    }
}

enum Search {
    Found { attempt: u64, nonce: i32, digest: Hash },
    Expired,
}

/// Mines a block by searching nonces in parallel. Workers take disjoint slices of the
/// attempt range and the lowest satisfying attempt wins, so the block is the same one
/// `pow::mine` returns for this seed.
pub fn mine_parallel(
    template: BlockTemplate,
    seed: i32,
    difficulty: Difficulty,
    bound: SearchBound,
) -> Result<Block> {
    let limit = bound.effective_attempts();
    let started = Instant::now();
    let expired = AtomicBool::new(false);
    let tried = AtomicU64::new(0);
    debug!(seed, limit, %difficulty, threads = rayon::current_num_threads(), "starting parallel nonce search");

    let found = (0..limit).into_par_iter().find_map_first(|attempt| {
        if expired.load(Ordering::Relaxed) {
            return Some(Search::Expired);
        }
        if bound.expired(attempt, started).is_some() {
            expired.store(true, Ordering::Relaxed);
            return Some(Search::Expired);
        }
        tried.fetch_add(1, Ordering::Relaxed);
        let nonce = nonce_at(seed, attempt);
        let digest = template.digest_with(nonce);
        difficulty.is_met_by(&digest).then_some(Search::Found {
            attempt,
            nonce,
            digest,
        })
    });

    let tried = tried.load(Ordering::Relaxed);
    match found {
        Some(Search::Found {
            attempt,
            nonce,
            digest,
        }) => {
            info!(
                nonce,
                attempt,
                tried,
                digest = %hex::encode(digest),
                "mined block in parallel"
            );
            Ok(template.seal(nonce, digest))
        }
        Some(Search::Expired) => {
            let deadline = bound.deadline.unwrap_or_default();
            warn!(attempts = tried, ?deadline, "parallel nonce search deadline elapsed");
            Err(LedgerError::DeadlineExceeded {
                attempts: tried,
                deadline,
            })
        }
        None => {
            warn!(attempts = limit, %difficulty, "parallel nonce search exhausted");
            Err(LedgerError::MiningExhausted {
                attempts: limit,
                difficulty,
            })
        }
    }
}
