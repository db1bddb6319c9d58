use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod constants;
pub mod error;
pub mod mine;
pub mod serde_hex;
pub mod shared;
pub mod validate;

pub use error::{LedgerError, Result};
pub use validate::Violation;

pub type Hash = [u8; 32];

/// SHA-256 over the decimal timestamp, the decimal nonce, the raw payload and the raw
/// previous digest, concatenated in that order.
pub fn block_digest(timestamp: i64, nonce: i32, payload: &[u8], prev_digest: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(payload);
    hasher.update(prev_digest);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

pub(crate) fn unix_now() -> Result<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|_| LedgerError::ClockBeforeEpoch)
}

/// A mined block. `prev_digest` is `None` only for genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    #[serde(with = "serde_hex::hex_vec")]
    pub payload: Vec<u8>,
    #[serde(with = "serde_hex::opt_hex32")]
    pub prev_digest: Option<Hash>,
    #[serde(with = "serde_hex::hex32")]
    pub digest: Hash,
    pub nonce: i32,
}

impl Block {
    /// The parent digest as hashed: empty for genesis.
    pub fn prev_digest_bytes(&self) -> &[u8] {
        match &self.prev_digest {
            Some(h) => &h[..],
            None => &[],
        }
    }

    pub fn compute_digest(&self) -> Hash {
        block_digest(
            self.timestamp,
            self.nonce,
            &self.payload,
            self.prev_digest_bytes(),
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_digest.is_none()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

pub mod pow {
    use super::{block_digest, unix_now, Block, Hash};
    use crate::constants::{
        BYTE, DEADLINE_CHECK_INTERVAL, NONCE_SPACE, POW_MARKER, POW_TARGET_DIFFICULTY,
    };
    use crate::error::{LedgerError, Result};
    use rand::Rng;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::time::{Duration, Instant};
    use tracing::{debug, info, warn};

    /// What a digest has to look like to count as mined.
    ///
    /// The default, `MarkerBytes(4)`, compares raw digest bytes against the ASCII
    /// character `'0'` (0x30). That is not the "leading zero hex digits" rule most
    /// proof-of-work systems use and is far harder than it reads; `HexZeros` and
    /// `ZeroBits` are the conventional alternatives.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "policy", content = "target", rename_all = "snake_case")]
    pub enum Difficulty {
        /// The first `n` raw bytes each equal `b'0'`.
        MarkerBytes(usize),
        /// The first `n` hex digits are zero.
        HexZeros(u32),
        /// At least `n` leading zero bits.
        ZeroBits(u32),
    }

    impl Default for Difficulty {
        fn default() -> Self {
            Difficulty::MarkerBytes(POW_TARGET_DIFFICULTY)
        }
    }

    impl Difficulty {
        pub fn is_met_by(&self, digest: &[u8]) -> bool {
            match *self {
                Difficulty::MarkerBytes(n) => {
                    digest.len() >= n && digest[..n].iter().all(|b| *b == POW_MARKER)
                }
                Difficulty::HexZeros(n) => count_leading_zero_nibbles(digest) >= n,
                Difficulty::ZeroBits(n) => count_leading_zero_bits(digest) >= n,
            }
        }
    }

    impl fmt::Display for Difficulty {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Difficulty::MarkerBytes(n) => write!(f, "{n} leading '0' bytes"),
                Difficulty::HexZeros(n) => write!(f, "{n} leading zero hex digits"),
                Difficulty::ZeroBits(n) => write!(f, "{n} leading zero bits"),
            }
        }
    }

    /// The fixed reference predicate: four leading `'0'` bytes.
    pub fn meets_difficulty(digest: &[u8]) -> bool {
        Difficulty::default().is_met_by(digest)
    }

    pub fn count_leading_zero_bits(hash: &[u8]) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += BYTE as u32;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }

    pub fn count_leading_zero_nibbles(hash: &[u8]) -> u32 {
        count_leading_zero_bits(hash) / 4
    }

    /// Starting nonce: current unix seconds plus a random non-negative `i32`, wrapping.
    pub fn seed_nonce() -> i32 {
        let now = unix_now().unwrap_or_default() as i32;
        now.wrapping_add(rand::thread_rng().gen_range(0..=i32::MAX))
    }

    /// Nonce tried on the `attempt`-th step of a search starting at `seed`.
    pub fn nonce_at(seed: i32, attempt: u64) -> i32 {
        seed.wrapping_add(attempt as u32 as i32)
    }

    /// Limits on a nonce search. The default covers the whole `i32` nonce space once
    /// and has no deadline.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SearchBound {
        pub max_attempts: u64,
        pub deadline: Option<Duration>,
    }

    impl Default for SearchBound {
        fn default() -> Self {
            Self {
                max_attempts: NONCE_SPACE,
                deadline: None,
            }
        }
    }

    impl SearchBound {
        pub fn attempts(max_attempts: u64) -> Self {
            Self {
                max_attempts,
                ..Self::default()
            }
        }

        pub fn with_deadline(mut self, deadline: Duration) -> Self {
            self.deadline = Some(deadline);
            self
        }

        /// Attempts actually made; past `NONCE_SPACE` nonces would repeat.
        pub fn effective_attempts(&self) -> u64 {
            self.max_attempts.min(NONCE_SPACE)
        }

        pub(crate) fn expired(&self, attempt: u64, started: Instant) -> Option<Duration> {
            let deadline = self.deadline?;
            (attempt % DEADLINE_CHECK_INTERVAL == 0 && started.elapsed() >= deadline)
                .then_some(deadline)
        }
    }

    /// A block before its nonce is chosen.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct BlockTemplate {
        pub timestamp: i64,
        pub payload: Vec<u8>,
        pub prev_digest: Option<Hash>,
    }

    impl BlockTemplate {
        /// Stamp a candidate with the current time.
        pub fn new(payload: Vec<u8>, prev_digest: Option<Hash>) -> Result<Self> {
            Ok(Self {
                timestamp: unix_now()?,
                payload,
                prev_digest,
            })
        }

        pub fn digest_with(&self, nonce: i32) -> Hash {
            let prev: &[u8] = match &self.prev_digest {
                Some(h) => &h[..],
                None => &[],
            };
            block_digest(self.timestamp, nonce, &self.payload, prev)
        }

        pub fn seal(self, nonce: i32, digest: Hash) -> Block {
            Block {
                timestamp: self.timestamp,
                payload: self.payload,
                prev_digest: self.prev_digest,
                digest,
                nonce,
            }
        }
    }

    /// Mine `template` by trying `seed`, `seed + 1`, ... (wrapping) until a digest meets
    /// `difficulty` or `bound` runs out.
    pub fn mine(
        template: BlockTemplate,
        seed: i32,
        difficulty: Difficulty,
        bound: SearchBound,
    ) -> Result<Block> {
        let limit = bound.effective_attempts();
        let started = Instant::now();
        debug!(seed, limit, %difficulty, "starting nonce search");

        for attempt in 0..limit {
            if let Some(deadline) = bound.expired(attempt, started) {
                warn!(attempts = attempt, ?deadline, "nonce search deadline elapsed");
                return Err(LedgerError::DeadlineExceeded {
                    attempts: attempt,
                    deadline,
                });
            }
            let nonce = nonce_at(seed, attempt);
            let digest = template.digest_with(nonce);
            if difficulty.is_met_by(&digest) {
                info!(
                    nonce,
                    attempts = attempt + 1,
                    digest = %hex::encode(digest),
                    "mined block"
                );
                return Ok(template.seal(nonce, digest));
            }
        }

        warn!(attempts = limit, %difficulty, "nonce search exhausted");
        Err(LedgerError::MiningExhausted {
            attempts: limit,
            difficulty,
        })
    }
}

pub mod chain {
    use super::*;
    use crate::mine::Miner;
    use crate::pow::{BlockTemplate, Difficulty};
    use crate::validate::{self, Violation};
    use tracing::{info, warn};

    /// Append-only, in-memory chain of mined blocks owned by a single writer.
    /// Wrap it in a [`crate::shared::SharedLedger`] to append from several threads.
    #[derive(Clone, Debug)]
    pub struct Ledger {
        blocks: Vec<Block>,
        head: Option<Hash>,
        miner: Miner,
    }

    impl Default for Ledger {
        fn default() -> Self {
            Self::new(Miner::default())
        }
    }

    impl Ledger {
        pub fn new(miner: Miner) -> Self {
            Self {
                blocks: Vec::new(),
                head: None,
                miner,
            }
        }

        pub fn with_genesis(payload: impl Into<Vec<u8>>, miner: Miner) -> Result<Self> {
            let mut ledger = Self::new(miner);
            ledger.mine_genesis(payload)?;
            Ok(ledger)
        }

        pub fn miner(&self) -> &Miner {
            &self.miner
        }

        pub fn difficulty(&self) -> Difficulty {
            self.miner.difficulty
        }

        pub fn blocks(&self) -> &[Block] {
            &self.blocks
        }

        pub fn len(&self) -> usize {
            self.blocks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.blocks.is_empty()
        }

        /// Digest of the last appended block.
        pub fn head(&self) -> Option<Hash> {
            self.head
        }

        pub fn tip(&self) -> Option<&Block> {
            self.blocks.last()
        }

        pub fn genesis(&self) -> Option<&Block> {
            self.blocks.first()
        }

        pub fn genesis_template(&self, payload: impl Into<Vec<u8>>) -> Result<BlockTemplate> {
            if !self.blocks.is_empty() {
                return Err(LedgerError::GenesisExists);
            }
            BlockTemplate::new(payload.into(), None)
        }

        /// Candidate block extending the current head.
        pub fn next_template(&self, payload: impl Into<Vec<u8>>) -> Result<BlockTemplate> {
            let prev = self.head.ok_or(LedgerError::EmptyChain)?;
            BlockTemplate::new(payload.into(), Some(prev))
        }

        pub fn mine_genesis(&mut self, payload: impl Into<Vec<u8>>) -> Result<&Block> {
            let template = self.genesis_template(payload)?;
            let block = self.miner.mine(template)?;
            Ok(self.push(block))
        }

        /// Mine a block carrying `payload` on top of the head and append it.
        pub fn append(&mut self, payload: impl Into<Vec<u8>>) -> Result<&Block> {
            let template = self.next_template(payload)?;
            let block = self.miner.mine(template)?;
            Ok(self.push(block))
        }

        /// Append a block mined elsewhere. It must extend the current head, carry a
        /// digest matching its fields and meet this ledger's difficulty.
        pub fn commit(&mut self, block: Block) -> Result<&Block> {
            if block.prev_digest != self.head {
                warn!(index = self.blocks.len(), "rejecting block mined on a stale head");
                return Err(LedgerError::StaleParent {
                    expected: self.head,
                    actual: block.prev_digest,
                });
            }
            validate::check_block(&block, self.blocks.len(), self.miner.difficulty)?;
            Ok(self.push(block))
        }

        /// Difficulty-only check over every stored digest.
        pub fn validate(&self) -> bool {
            validate::validate_difficulty(&self.blocks, self.miner.difficulty)
        }

        /// Recompute every digest and check difficulty and linkage; reports the first failure.
        pub fn verify(&self) -> std::result::Result<(), Violation> {
            validate::verify_chain(&self.blocks, self.miner.difficulty)
        }

        fn push(&mut self, block: Block) -> &Block {
            let index = self.blocks.len();
            info!(
                index,
                nonce = block.nonce,
                digest = %block.digest_hex(),
                "appended block"
            );
            self.head = Some(block.digest);
            self.blocks.push(block);
            &self.blocks[index]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::chain::Ledger;
    use super::mine::Miner;
    use super::pow::{self, BlockTemplate, Difficulty, SearchBound};
    use super::*;

    const GENESIS_DIGEST: &str =
        "f539c7ceed06301713f01b2728aa7625ac150ab161799aebca12fa8755f79dac";

    fn easy_miner() -> Miner {
        Miner::new(Difficulty::MarkerBytes(1))
    }

    fn template(payload: &[u8], prev: Option<Hash>) -> BlockTemplate {
        BlockTemplate {
            timestamp: 1_600_000_000,
            payload: payload.to_vec(),
            prev_digest: prev,
        }
    }

    #[test]
    fn digest_known_vector() {
        let digest = block_digest(1_600_000_000, 42, b"GENESIS", &[]);
        assert_eq!(hex::encode(digest), GENESIS_DIGEST);
    }

    #[test]
    fn digest_renders_negative_nonce_in_decimal() {
        let digest = block_digest(1_600_000_000, -7, b"A", &[]);
        assert_eq!(
            hex::encode(digest),
            "39c4216b9a978370d0f189ded12a2e655f2557333d1d10cfc12deb29a50dc56e"
        );
    }

    #[test]
    fn digest_appends_raw_parent_bytes() {
        let parent = block_digest(1_600_000_000, 42, b"GENESIS", &[]);
        let digest = block_digest(1_600_000_001, 1, b"B", &parent);
        assert_eq!(
            hex::encode(digest),
            "083467f94e2355bbc381eeb3ed1cd9931c09b16f96e48cf2a6f338c5050dac06"
        );
    }

    #[test]
    fn digest_is_deterministic() {
        let a = block_digest(1_700_000_000, i32::MIN, b"payload", &[7u8; 32]);
        let b = block_digest(1_700_000_000, i32::MIN, b"payload", &[7u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_nonce() {
        let a = block_digest(1_700_000_000, 1, b"payload", &[]);
        let b = block_digest(1_700_000_000, 2, b"payload", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn leading_zero_bits_examples() {
        let mut h = [0u8; 32];
        assert_eq!(pow::count_leading_zero_bits(&h), 256);
        h[0] = 0x0F; // 00001111
        assert_eq!(pow::count_leading_zero_bits(&h), 4);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(pow::count_leading_zero_bits(&h), 8);
        h[1] = 0x40;
        assert_eq!(pow::count_leading_zero_bits(&h), 9);
        assert_eq!(pow::count_leading_zero_nibbles(&h), 2);
    }

    #[test]
    fn marker_bytes_compare_against_ascii_zero() {
        let mut h = [0u8; 32];
        // Raw zero bytes are not the '0' marker.
        assert!(!pow::meets_difficulty(&h));
        h[..4].copy_from_slice(b"0000");
        assert!(pow::meets_difficulty(&h));
        h[3] = b'1';
        assert!(!pow::meets_difficulty(&h));
        assert!(Difficulty::MarkerBytes(3).is_met_by(&h));
    }

    #[test]
    fn marker_bytes_longer_than_digest_never_hold() {
        let h = [b'0'; 32];
        assert!(Difficulty::MarkerBytes(32).is_met_by(&h));
        assert!(!Difficulty::MarkerBytes(33).is_met_by(&h));
    }

    #[test]
    fn hex_zero_and_bit_policies() {
        let mut h = [0xffu8; 32];
        h[0] = 0x00;
        h[1] = 0x0f;
        assert!(Difficulty::HexZeros(3).is_met_by(&h));
        assert!(!Difficulty::HexZeros(4).is_met_by(&h));
        assert!(Difficulty::ZeroBits(12).is_met_by(&h));
        assert!(!Difficulty::ZeroBits(13).is_met_by(&h));
    }

    #[test]
    fn default_difficulty_is_four_marker_bytes() {
        assert_eq!(Difficulty::default(), Difficulty::MarkerBytes(4));
        assert_eq!(Difficulty::default().to_string(), "4 leading '0' bytes");
    }

    #[test]
    fn difficulty_serialization_example() {
        let json = serde_json::to_string(&Difficulty::HexZeros(5)).unwrap();
        assert_eq!(json, r#"{"policy":"hex_zeros","target":5}"#);
        let back: Difficulty = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Difficulty::HexZeros(5));
    }

    #[test]
    fn mine_finds_first_satisfying_nonce_from_seed() {
        let block = pow::mine(
            template(b"GENESIS", None),
            0,
            Difficulty::MarkerBytes(1),
            SearchBound::default(),
        )
        .unwrap();
        assert_eq!(block.nonce, 3);
        assert_eq!(
            block.digest_hex(),
            "306b3dfa2bb67f24fb403570986c44f25dba2397395b4a14434022423ed1f2e3"
        );
        assert_eq!(block.digest, block.compute_digest());
        assert_eq!(block.digest_hex().len(), constants::HASH_HEX_SIZE);
    }

    #[test]
    fn mine_wraps_past_i32_max() {
        let block = pow::mine(
            template(b"GENESIS", None),
            i32::MAX,
            Difficulty::MarkerBytes(1),
            SearchBound::default(),
        )
        .unwrap();
        assert_eq!(block.nonce, -2_147_483_231);
        assert_eq!(pow::nonce_at(i32::MAX, 1), i32::MIN);
    }

    #[test]
    fn mine_reports_exhaustion_on_bounded_range() {
        let err = pow::mine(
            template(b"GENESIS", None),
            0,
            Difficulty::MarkerBytes(8),
            SearchBound::attempts(10_000),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LedgerError::MiningExhausted {
                attempts: 10_000,
                difficulty: Difficulty::MarkerBytes(8),
            }
        );
    }

    #[test]
    fn mine_stops_at_deadline() {
        let bound = SearchBound::default().with_deadline(std::time::Duration::ZERO);
        let err = pow::mine(template(b"x", None), 0, Difficulty::MarkerBytes(8), bound)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DeadlineExceeded { attempts: 0, .. }
        ));
    }

    #[test]
    fn search_bound_is_clamped_to_nonce_space() {
        assert_eq!(SearchBound::attempts(u64::MAX).effective_attempts(), 1 << 32);
        assert_eq!(SearchBound::attempts(5).effective_attempts(), 5);
    }

    #[test]
    fn seed_nonce_varies() {
        let seeds: std::collections::HashSet<i32> = (0..16).map(|_| pow::seed_nonce()).collect();
        assert!(seeds.len() > 1);
    }

    #[test]
    fn genesis_then_two_appends_links_blocks() {
        let mut ledger = Ledger::with_genesis("GENESIS", easy_miner()).unwrap();
        ledger.append("A").unwrap();
        ledger.append("B").unwrap();

        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].prev_digest.is_none());
        assert!(blocks[0].prev_digest_bytes().is_empty());
        assert_eq!(blocks[1].prev_digest, Some(blocks[0].digest));
        assert_eq!(blocks[2].prev_digest, Some(blocks[1].digest));
        assert_eq!(ledger.head(), Some(blocks[2].digest));
        assert!(ledger.validate());
        assert_eq!(ledger.verify(), Ok(()));
    }

    #[test]
    fn append_before_genesis_fails() {
        let mut ledger = Ledger::new(easy_miner());
        assert_eq!(ledger.append("A").unwrap_err(), LedgerError::EmptyChain);
        assert!(ledger.is_empty());
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn second_genesis_is_rejected() {
        let mut ledger = Ledger::with_genesis("GENESIS", easy_miner()).unwrap();
        assert_eq!(
            ledger.mine_genesis("again").unwrap_err(),
            LedgerError::GenesisExists
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn exhausted_genesis_leaves_chain_empty() {
        let mut ledger = Ledger::new(
            Miner::new(Difficulty::MarkerBytes(8)).with_bound(SearchBound::attempts(100)),
        );
        assert!(matches!(
            ledger.mine_genesis("GENESIS"),
            Err(LedgerError::MiningExhausted { attempts: 100, .. })
        ));
        assert!(ledger.is_empty());
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn commit_rejects_stale_parent() {
        let mut ledger = Ledger::with_genesis("GENESIS", easy_miner()).unwrap();
        let template = ledger.next_template("A").unwrap();
        let block = ledger.miner().mine(template).unwrap();
        ledger.append("B").unwrap();

        let err = ledger.commit(block).unwrap_err();
        assert!(matches!(err, LedgerError::StaleParent { .. }));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn commit_rejects_forged_digest() {
        let mut ledger = Ledger::with_genesis("GENESIS", easy_miner()).unwrap();
        let template = ledger.next_template("A").unwrap();
        let mut block = ledger.miner().mine(template).unwrap();
        block.payload = b"forged".to_vec();

        let err = ledger.commit(block).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(Violation::DigestMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn commit_accepts_externally_mined_block() {
        let mut ledger = Ledger::with_genesis("GENESIS", easy_miner()).unwrap();
        let template = ledger.next_template("A").unwrap();
        let block = ledger.miner().mine(template).unwrap();
        let digest = block.digest;
        ledger.commit(block).unwrap();
        assert_eq!(ledger.head(), Some(digest));
        assert_eq!(ledger.verify(), Ok(()));
    }

    #[test]
    fn block_serialization_example() {
        let block = Block {
            timestamp: 1_600_000_000,
            payload: b"GENESIS".to_vec(),
            prev_digest: None,
            digest: [0x30; 32],
            nonce: -1,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["payload"], "0x47454e45534953");
        assert!(json["prev_digest"].is_null());
        assert_eq!(json["nonce"], -1);
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
