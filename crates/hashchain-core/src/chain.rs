use crate::constants::{GENESIS_DATA, GENESIS_PREVIOUS_HASH};
use crate::error::{LedgerError, LinkageFault, Result};
use crate::{mine::mine_parallel, pow::MineOptions, Block, PendingBlock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// The unmined genesis block with the current time as its timestamp.
pub fn genesis_block() -> Block {
    PendingBlock::new(0, GENESIS_DATA, GENESIS_PREVIOUS_HASH).seal()
}

/// An append-only sequence of blocks starting at genesis.
///
/// Serializes as a JSON array of blocks; deserializing runs [`Chain::from_blocks`],
/// so a tampered or mislinked array is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Block>", try_from = "Vec<Block>")]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self {
            blocks: vec![genesis_block()],
        }
    }

    /// Rebuild a chain from blocks of unknown provenance.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self> {
        let chain = Self { blocks };
        chain.validate()?;
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; a chain holds at least its genesis block.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> &Block {
        // `new` and `from_blocks` both guarantee a genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    /// An unmined block linked to the current tip.
    pub fn next_block(&self, data: impl Into<String>) -> PendingBlock {
        let tip = self.tip();
        debug!("templating block {} on tip {}", self.len(), tip.hash());
        PendingBlock::new(self.len() as u64, data, tip.hash())
    }

    /// Append a mined block. Fails if it was not built on the current tip.
    pub fn append(&mut self, block: Block) -> Result<&Block> {
        check_successor(self.tip(), &block)?;
        debug!("appending block {} with hash {}", block.index(), block.hash());
        self.blocks.push(block);
        Ok(self.tip())
    }

    pub fn extend(&mut self, data: impl Into<String>, difficulty: u32) -> Result<&Block> {
        self.extend_with(data, difficulty, &MineOptions::default())
    }

    /// Like [`Chain::extend`], bounded by `options`. The chain is unchanged
    /// when mining fails.
    pub fn extend_with(
        &mut self,
        data: impl Into<String>,
        difficulty: u32,
        options: &MineOptions,
    ) -> Result<&Block> {
        let block = self.next_block(data).mine(difficulty, options)?;
        self.append(block)
    }

    pub fn extend_parallel(
        &mut self,
        data: impl Into<String>,
        difficulty: u32,
        options: &MineOptions,
    ) -> Result<&Block> {
        let block = mine_parallel(self.next_block(data), difficulty, options)?;
        self.append(block)
    }

    /// Recompute every hash and check genesis fields, indices and linkage.
    pub fn validate(&self) -> Result<()> {
        let result = validate_blocks(&self.blocks);
        if let Err(err) = &result {
            warn!("chain validation failed: {err}");
        }
        result
    }
}

fn validate_blocks(blocks: &[Block]) -> Result<()> {
    let genesis = blocks
        .first()
        .ok_or_else(|| LedgerError::linkage(0, LinkageFault::MissingGenesis))?;
    if genesis.index() != 0
        || genesis.data() != GENESIS_DATA
        || genesis.previous_hash() != GENESIS_PREVIOUS_HASH
    {
        return Err(LedgerError::linkage(0, LinkageFault::BadGenesis));
    }
    check_self_hash(genesis)?;
    for pair in blocks.windows(2) {
        check_successor(&pair[0], &pair[1])?;
    }
    Ok(())
}

fn check_self_hash(block: &Block) -> Result<()> {
    let computed = block.compute_hash();
    if computed != block.hash() {
        return Err(LedgerError::linkage(
            block.index(),
            LinkageFault::StaleHash {
                stored: block.hash().to_string(),
                computed,
            },
        ));
    }
    Ok(())
}

fn check_successor(prev: &Block, next: &Block) -> Result<()> {
    let expected = prev.index() + 1;
    if next.index() != expected {
        return Err(LedgerError::linkage(
            expected,
            LinkageFault::IndexMismatch {
                expected,
                found: next.index(),
            },
        ));
    }
    if next.previous_hash() != prev.hash() {
        return Err(LedgerError::linkage(
            next.index(),
            LinkageFault::PreviousHashMismatch {
                expected: prev.hash().to_string(),
                found: next.previous_hash().to_string(),
            },
        ));
    }
    check_self_hash(next)
}

impl From<Chain> for Vec<Block> {
    fn from(chain: Chain) -> Self {
        chain.blocks
    }
}

impl TryFrom<Vec<Block>> for Chain {
    type Error = LedgerError;

    fn try_from(blocks: Vec<Block>) -> Result<Self> {
        Chain::from_blocks(blocks)
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// A chain shared between mining workers.
///
/// Mining happens outside the lock; only templating and appending hold it, so
/// a block being mined is never visible as part of the chain.
#[derive(Clone, Debug, Default)]
pub struct SharedChain {
    inner: Arc<Mutex<Chain>>,
}

impl SharedChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            inner: Arc::new(Mutex::new(chain)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Chain> {
        // Chain methods never leave a half-applied append behind, so a
        // poisoned lock still guards a consistent chain.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Chain {
        self.lock().clone()
    }

    pub fn validate(&self) -> Result<()> {
        self.lock().validate()
    }

    /// Mine a block on the current tip and append it. If another worker moved
    /// the tip while this one was mining, re-template and mine again.
    pub fn mine_and_append(
        &self,
        data: impl Into<String>,
        difficulty: u32,
        options: &MineOptions,
    ) -> Result<Block> {
        let data = data.into();
        loop {
            let pending = self.lock().next_block(data.clone());
            let index = pending.index();
            let block = pending.mine(difficulty, options)?;

            let mut chain = self.lock();
            if chain.len() as u64 != index {
                debug!("tip moved past {index} while mining, retrying");
                continue;
            }
            return chain.append(block).cloned();
        }
    }
}
