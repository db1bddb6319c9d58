//! Chain validation.
//!
//! The checks are kept separate so they can be combined or tested on their own:
//! [`constraints_hold`] looks only at a block's stored digest, [`digest_matches`]
//! recomputes it, and [`linkage_holds`] walks the parent pointers.
//! [`verify_chain`] runs all three and names the first block that fails.

use thiserror::Error;
use tracing::warn;

use crate::pow::Difficulty;
use crate::{Block, Hash};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    #[error(
        "block {index}: stored digest {} does not match recomputed {}",
        hex::encode(.stored),
        hex::encode(.computed)
    )]
    DigestMismatch {
        index: usize,
        stored: Hash,
        computed: Hash,
    },

    #[error("block {index}: digest does not meet {difficulty}")]
    Difficulty { index: usize, difficulty: Difficulty },

    #[error("block {index}: genesis must not reference a parent")]
    UnexpectedParent { index: usize },

    #[error("block {index}: missing parent digest")]
    MissingParent { index: usize },

    #[error(
        "block {index}: parent digest {} does not match previous block digest {}",
        hex::encode(.actual),
        hex::encode(.expected)
    )]
    BrokenLink {
        index: usize,
        expected: Hash,
        actual: Hash,
    },
}

impl Violation {
    pub fn index(&self) -> usize {
        match self {
            Violation::DigestMismatch { index, .. }
            | Violation::Difficulty { index, .. }
            | Violation::UnexpectedParent { index }
            | Violation::MissingParent { index }
            | Violation::BrokenLink { index, .. } => *index,
        }
    }
}

/// The stored digest meets `difficulty`. Says nothing about whether it is the digest of
/// the block's fields.
pub fn constraints_hold(block: &Block, difficulty: Difficulty) -> bool {
    difficulty.is_met_by(&block.digest)
}

pub fn digest_matches(block: &Block) -> bool {
    block.compute_digest() == block.digest
}

pub fn linkage_holds(blocks: &[Block]) -> bool {
    (0..blocks.len()).all(|i| check_link(blocks, i).is_ok())
}

/// Difficulty-only pass over the chain; stops at the first failing block.
pub fn validate_difficulty(blocks: &[Block], difficulty: Difficulty) -> bool {
    match blocks.iter().position(|b| !constraints_hold(b, difficulty)) {
        Some(index) => {
            warn!(index, %difficulty, "block digest fails difficulty");
            false
        }
        None => true,
    }
}

pub fn verify_chain(blocks: &[Block], difficulty: Difficulty) -> Result<(), Violation> {
    for (index, block) in blocks.iter().enumerate() {
        let checked =
            check_block(block, index, difficulty).and_then(|_| check_link(blocks, index));
        if let Err(violation) = checked {
            warn!(%violation, "chain verification failed");
            return Err(violation);
        }
    }
    Ok(())
}

pub(crate) fn check_block(
    block: &Block,
    index: usize,
    difficulty: Difficulty,
) -> Result<(), Violation> {
    let computed = block.compute_digest();
    if computed != block.digest {
        return Err(Violation::DigestMismatch {
            index,
            stored: block.digest,
            computed,
        });
    }
    if !constraints_hold(block, difficulty) {
        return Err(Violation::Difficulty { index, difficulty });
    }
    Ok(())
}

fn check_link(blocks: &[Block], index: usize) -> Result<(), Violation> {
    let block = &blocks[index];
    match (index.checked_sub(1).map(|p| &blocks[p]), block.prev_digest) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(Violation::UnexpectedParent { index }),
        (Some(_), None) => Err(Violation::MissingParent { index }),
        (Some(prev), Some(actual)) if actual != prev.digest => Err(Violation::BrokenLink {
            index,
            expected: prev.digest,
            actual,
        }),
        (Some(_), Some(_)) => Ok(()),
    }
}
