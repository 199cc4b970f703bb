use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid difficulty {requested}: expected 0..={max} leading zero hex digits")]
    InvalidDifficulty { requested: i64, max: u32 },

    #[error("mining timed out after {attempts} attempts")]
    MiningTimeout { attempts: u64 },

    #[error("mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("nonce space exhausted without meeting the difficulty")]
    NonceExhausted,

    #[error("chain linkage violation at block {index}: {fault}")]
    ChainLinkageViolation { index: u64, fault: LinkageFault },
}

/// What exactly was wrong with a block that failed linkage checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkageFault {
    #[error("chain has no genesis block")]
    MissingGenesis,

    #[error("genesis block does not carry the fixed genesis fields")]
    BadGenesis,

    #[error("expected index {expected}, found {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("previous_hash {found} does not match predecessor hash {expected}")]
    PreviousHashMismatch { expected: String, found: String },

    #[error("stored hash {stored} does not match recomputed {computed}")]
    StaleHash { stored: String, computed: String },
}

impl LedgerError {
    pub(crate) fn linkage(index: u64, fault: LinkageFault) -> Self {
        LedgerError::ChainLinkageViolation { index, fault }
    }
}
