#![allow(dead_code)]

use powchain_core::chain::Ledger;
use powchain_core::mine::{Miner, Strategy};
use powchain_core::pow::Difficulty;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// One '0' byte: about 256 attempts per block.
pub const EASY: Difficulty = Difficulty::MarkerBytes(1);

pub fn easy_miner() -> Miner {
    Miner::new(EASY)
}

pub fn parallel_miner() -> Miner {
    easy_miner().with_strategy(Strategy::Parallel)
}

pub fn random_payloads(seed: u64, count: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(0..64);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect()
}

pub fn build_ledger(miner: Miner, payloads: &[Vec<u8>]) -> Ledger {
    let mut ledger = Ledger::with_genesis("GENESIS", miner).expect("mine genesis");
    for payload in payloads {
        ledger.append(payload.clone()).expect("append block");
    }
    ledger
}
