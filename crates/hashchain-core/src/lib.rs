//! A minimal append-only ledger: blocks hash-linked to their predecessor and
//! optionally sealed by a leading-zero proof-of-work.

pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;

use constants::{HASH_SIZE, MAX_DIFFICULTY};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub use chain::{Chain, SharedChain};
pub use error::{LedgerError, LinkageFault, Result};
pub use mine::mine_parallel;
pub use pow::{CancelToken, MineOptions};

pub type Hash = [u8; HASH_SIZE];

/// Bytes fed to SHA-256 for everything except the nonce.
///
/// Integers are fixed-width little-endian, text fields are prefixed with their
/// byte length, so no two field combinations share an encoding.
fn prefix_bytes(index: u64, timestamp: u64, data: &str, previous_hash: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + 8 + 8 + data.len() + 8 + previous_hash.len() + 8);
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    bytes.extend_from_slice(data.as_bytes());
    bytes.extend_from_slice(&(previous_hash.len() as u64).to_le_bytes());
    bytes.extend_from_slice(previous_hash.as_bytes());
    bytes
}

pub fn hash_bytes(
    index: u64,
    timestamp: u64,
    data: &str,
    previous_hash: &str,
    nonce: u64,
) -> Vec<u8> {
    let mut bytes = prefix_bytes(index, timestamp, data, previous_hash);
    bytes.extend_from_slice(&nonce.to_le_bytes());
    bytes
}

/// Hasher primed with the nonce-independent part of a block.
pub(crate) fn digest_prefix(index: u64, timestamp: u64, data: &str, previous_hash: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(prefix_bytes(index, timestamp, data, previous_hash));
    hasher
}

pub(crate) fn finish_digest(prefix: &Sha256, nonce: u64) -> Hash {
    let mut hasher = prefix.clone();
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    out
}

/// Lowercase hex SHA-256 over a block's fields.
pub fn block_digest(
    index: u64,
    timestamp: u64,
    data: &str,
    previous_hash: &str,
    nonce: u64,
) -> String {
    let prefix = digest_prefix(index, timestamp, data, previous_hash);
    hex::encode(finish_digest(&prefix, nonce))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Number of leading `'0'` hex characters a block hash must have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Difficulty(u32);

impl Difficulty {
    pub const ZERO: Difficulty = Difficulty(0);

    pub fn new(leading_zeros: u32) -> Result<Self> {
        if leading_zeros > MAX_DIFFICULTY {
            return Err(LedgerError::InvalidDifficulty {
                requested: i64::from(leading_zeros),
                max: MAX_DIFFICULTY,
            });
        }
        Ok(Self(leading_zeros))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_met_by(self, hash: &Hash) -> bool {
        pow::leading_zero_hex_digits(hash) >= self.0
    }

    pub fn is_met_by_hex(self, hash: &str) -> bool {
        let want = self.0 as usize;
        hash.len() >= want && hash.bytes().take(want).all(|c| c == b'0')
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        match u32::try_from(value) {
            Ok(v) if v <= MAX_DIFFICULTY => Ok(Self(v)),
            _ => Err(LedgerError::InvalidDifficulty {
                requested: value,
                max: MAX_DIFFICULTY,
            }),
        }
    }
}

/// A block that has not been committed yet. Only this form can be mined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingBlock {
    index: u64,
    timestamp: u64,
    data: String,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

impl PendingBlock {
    pub fn new(index: u64, data: impl Into<String>, previous_hash: impl Into<String>) -> Self {
        Self::with_timestamp(index, unix_now(), data, previous_hash)
    }

    pub fn with_timestamp(
        index: u64,
        timestamp: u64,
        data: impl Into<String>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let data = data.into();
        let previous_hash = previous_hash.into();
        let hash = block_digest(index, timestamp, &data, &previous_hash, 0);
        Self {
            index,
            timestamp,
            data,
            previous_hash,
            nonce: 0,
            hash,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub(crate) fn digest_prefix(&self) -> Sha256 {
        digest_prefix(self.index, self.timestamp, &self.data, &self.previous_hash)
    }

    /// Freeze the block as-is, without any proof-of-work.
    pub fn seal(self) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            data: self.data,
            previous_hash: self.previous_hash,
            nonce: self.nonce,
            hash: self.hash,
        }
    }

    pub(crate) fn seal_with(self, nonce: u64, hash: &Hash) -> Block {
        let mut block = self.seal();
        block.nonce = nonce;
        block.hash = hex::encode(hash);
        block
    }

    /// Mine the block by incrementing the nonce until its hash starts with
    /// `difficulty` zero hex digits, or the budget in `options` runs out.
    ///
    /// A difficulty already met by the current hash (always the case for 0)
    /// returns immediately with nonce and hash untouched.
    pub fn mine(self, difficulty: u32, options: &MineOptions) -> Result<Block> {
        let difficulty = Difficulty::new(difficulty)?;
        if difficulty.is_met_by_hex(&self.hash) {
            return Ok(self.seal());
        }
        let start = self.nonce.checked_add(1).ok_or(LedgerError::NonceExhausted)?;
        let found = pow::search(&self.digest_prefix(), start, difficulty, options)?;
        info!(
            "Mined block {} with nonce {} after {} attempts and hash {}",
            self.index,
            found.nonce,
            found.attempts,
            hex::encode(found.hash)
        );
        Ok(self.seal_with(found.nonce, &found.hash))
    }
}

/// A mined block. Fields are read-only; a `Block` never changes once built.
///
/// Blocks obtained through deserialization are untrusted until checked with
/// [`Block::verify_hash`] or [`Chain::from_blocks`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    timestamp: u64,
    data: String,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

impl Block {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn compute_hash(&self) -> String {
        block_digest(
            self.index,
            self.timestamp,
            &self.data,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn meets(&self, difficulty: Difficulty) -> bool {
        difficulty.is_met_by_hex(&self.hash)
    }
}

pub mod pow {
    use super::{finish_digest, Difficulty, Hash};
    use crate::constants::BUDGET_CHECK_INTERVAL;
    use crate::error::{LedgerError, Result};
    use sha2::Sha256;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Cooperative cancellation flag shared between a miner and its caller.
    #[derive(Clone, Debug, Default)]
    pub struct CancelToken(Arc<AtomicBool>);

    impl CancelToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::Relaxed);
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    /// Bounds on a nonce search. The default is unbounded.
    #[derive(Clone, Debug, Default)]
    pub struct MineOptions {
        deadline: Option<Instant>,
        cancel: Option<CancelToken>,
    }

    impl MineOptions {
        pub fn unbounded() -> Self {
            Self::default()
        }

        pub fn with_timeout(self, timeout: Duration) -> Self {
            self.with_deadline(Instant::now() + timeout)
        }

        pub fn with_deadline(mut self, deadline: Instant) -> Self {
            self.deadline = Some(deadline);
            self
        }

        pub fn with_cancel(mut self, token: CancelToken) -> Self {
            self.cancel = Some(token);
            self
        }

        pub fn deadline(&self) -> Option<Instant> {
            self.deadline
        }

        /// Err if the search should stop; cancellation wins over the deadline.
        pub(crate) fn check(&self, attempts: u64) -> Result<()> {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(LedgerError::MiningCancelled { attempts });
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(LedgerError::MiningTimeout { attempts });
            }
            Ok(())
        }
    }

    pub(crate) struct Found {
        pub nonce: u64,
        pub hash: Hash,
        pub attempts: u64,
    }

    /// Sequential search from `start` upwards.
    pub(crate) fn search(
        prefix: &Sha256,
        start: u64,
        difficulty: Difficulty,
        options: &MineOptions,
    ) -> Result<Found> {
        let mut nonce = start;
        let mut attempts = 0u64;
        loop {
            let hash = finish_digest(prefix, nonce);
            attempts += 1;
            if difficulty.is_met_by(&hash) {
                return Ok(Found {
                    nonce,
                    hash,
                    attempts,
                });
            }
            if attempts % BUDGET_CHECK_INTERVAL == 1 {
                options.check(attempts)?;
            }
            nonce = nonce.checked_add(1).ok_or(LedgerError::NonceExhausted)?;
        }
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }

    /// Leading `'0'` characters in the lowercase hex rendering of `hash`.
    pub fn leading_zero_hex_digits(hash: &Hash) -> u32 {
        count_leading_zero_bits(hash) / 4
    }
}
