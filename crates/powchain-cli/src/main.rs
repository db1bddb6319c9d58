use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use powchain_core::chain::Ledger;
use powchain_core::constants::POW_TARGET_DIFFICULTY;
use powchain_core::mine::{Miner, Strategy};
use powchain_core::pow::{Difficulty, SearchBound};
use powchain_core::Block;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "powchain")]
#[command(about = "Mine a small proof-of-work hash chain and print it as JSON")]
struct Cli {
    /// Payload of the genesis block
    #[arg(long, default_value = "GENESIS")]
    genesis: String,

    /// Number of blocks with random payloads to append after genesis
    #[arg(long, default_value_t = 2)]
    blocks: usize,

    /// Payload to append instead of random ones (repeatable)
    #[arg(long = "payload")]
    payloads: Vec<String>,

    /// How a digest is judged
    #[arg(long, value_enum, default_value_t = Policy::MarkerBytes)]
    policy: Policy,

    /// Target for the chosen policy (bytes, hex digits or bits)
    #[arg(long, default_value_t = POW_TARGET_DIFFICULTY as u32)]
    difficulty: u32,

    /// Give up on a block after this many nonces
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Give up on a block after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,

    /// Print single-line JSON
    #[arg(long)]
    compact: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    MarkerBytes,
    HexZeros,
    ZeroBits,
}

impl Cli {
    fn miner(&self) -> Miner {
        let difficulty = match self.policy {
            Policy::MarkerBytes => Difficulty::MarkerBytes(self.difficulty as usize),
            Policy::HexZeros => Difficulty::HexZeros(self.difficulty),
            Policy::ZeroBits => Difficulty::ZeroBits(self.difficulty),
        };
        let mut bound = SearchBound::default();
        if let Some(max) = self.max_attempts {
            bound.max_attempts = max;
        }
        if let Some(secs) = self.timeout_secs {
            bound = bound.with_deadline(Duration::from_secs(secs));
        }
        let strategy = if self.parallel {
            Strategy::Parallel
        } else {
            Strategy::Sequential
        };
        Miner::new(difficulty)
            .with_bound(bound)
            .with_strategy(strategy)
    }

    fn payloads(&self) -> Vec<String> {
        if !self.payloads.is_empty() {
            return self.payloads.clone();
        }
        let mut rng = rand::thread_rng();
        (0..self.blocks)
            .map(|_| rng.gen::<u64>().to_string())
            .collect()
    }
}

#[derive(Serialize)]
struct ChainReport<'a> {
    difficulty: Difficulty,
    head: Option<String>,
    valid: bool,
    verified: bool,
    blocks: &'a [Block],
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let miner = cli.miner();
    info!(difficulty = %miner.difficulty, strategy = ?miner.strategy, "building chain");

    let mut ledger =
        Ledger::with_genesis(cli.genesis.as_bytes(), miner).context("mining genesis block")?;
    for (i, payload) in cli.payloads().into_iter().enumerate() {
        ledger
            .append(payload)
            .with_context(|| format!("mining block {}", i + 1))?;
    }

    let valid = ledger.validate();
    let verified = match ledger.verify() {
        Ok(()) => true,
        Err(violation) => {
            warn!(%violation, "chain failed verification");
            false
        }
    };
    info!(blocks = ledger.len(), valid, verified, "chain built");

    let report = ChainReport {
        difficulty: ledger.difficulty(),
        head: ledger.head().map(hex::encode),
        valid,
        verified,
        blocks: ledger.blocks(),
    };
    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{json}");
    Ok(())
}
