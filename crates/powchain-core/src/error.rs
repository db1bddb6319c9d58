use std::time::Duration;

use thiserror::Error;

use crate::pow::Difficulty;
use crate::validate::Violation;
use crate::Hash;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failures surfaced by the ledger. None of them leave the chain in a partial state,
/// so callers can retry or initialise the chain and carry on.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("chain is empty: mine a genesis block before appending")]
    EmptyChain,

    #[error("chain already has a genesis block")]
    GenesisExists,

    /// Every nonce in the search bound was tried.
    #[error("nonce search exhausted after {attempts} attempts without meeting {difficulty}")]
    MiningExhausted { attempts: u64, difficulty: Difficulty },

    #[error("nonce search abandoned after {attempts} attempts: deadline of {deadline:?} elapsed")]
    DeadlineExceeded { attempts: u64, deadline: Duration },

    /// The block was mined against a head that is no longer the tip.
    #[error("block extends {} but the chain head is {}", short(.actual), short(.expected))]
    StaleParent {
        expected: Option<Hash>,
        actual: Option<Hash>,
    },

    #[error("block rejected: {0}")]
    Rejected(#[from] Violation),

    #[error("system clock is set before the unix epoch")]
    ClockBeforeEpoch,
}

fn short(digest: &Option<Hash>) -> String {
    match digest {
        Some(d) => hex::encode(&d[..4]),
        None => "<none>".to_string(),
    }
}
