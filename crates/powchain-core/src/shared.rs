use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::chain::Ledger;
use crate::error::{LedgerError, Result};
use crate::pow::BlockTemplate;
use crate::validate::Violation;
use crate::{Block, Hash};

/// Cloneable handle to a ledger shared between threads.
///
/// Mining happens outside the lock. A mined block is committed only if the head it
/// was built on is still the tip; otherwise it is dropped and mined again on the new
/// head, so each call appends exactly one block.
#[derive(Clone, Debug, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    // Blocks are pushed after all fallible work, so a poisoned ledger is still consistent.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mine_genesis(&self, payload: impl Into<Vec<u8>>) -> Result<Block> {
        let payload = payload.into();
        self.mine_and_commit(|ledger| ledger.genesis_template(payload.clone()))
    }

    pub fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Block> {
        let payload = payload.into();
        self.mine_and_commit(|ledger| ledger.next_template(payload.clone()))
    }

    fn mine_and_commit<F>(&self, make_template: F) -> Result<Block>
    where
        F: Fn(&Ledger) -> Result<BlockTemplate>,
    {
        loop {
            let (template, miner) = {
                let ledger = self.lock();
                (make_template(&*ledger)?, *ledger.miner())
            };
            let block = miner.mine(template)?;
            match self.lock().commit(block) {
                Ok(committed) => return Ok(committed.clone()),
                Err(LedgerError::StaleParent { expected, .. }) => {
                    debug!(head = ?expected.map(hex::encode), "head moved while mining, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn head(&self) -> Option<Hash> {
        self.lock().head()
    }

    /// Copy of the blocks at this moment.
    pub fn snapshot(&self) -> Vec<Block> {
        self.lock().blocks().to_vec()
    }

    pub fn validate(&self) -> bool {
        self.lock().validate()
    }

    pub fn verify(&self) -> std::result::Result<(), Violation> {
        self.lock().verify()
    }

    /// Run `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&*self.lock())
    }
}

impl From<Ledger> for SharedLedger {
    fn from(ledger: Ledger) -> Self {
        Self::new(ledger)
    }
}
