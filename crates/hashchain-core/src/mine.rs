use crate::{
    constants::BUDGET_CHECK_INTERVAL, error::LedgerError, finish_digest, pow::MineOptions, Block,
    Difficulty, PendingBlock, Result,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Mines a block by searching nonces in parallel until its hash starts with
/// `difficulty` zero hex digits.
///
/// Any satisfying nonce may win, so the result is not necessarily the one the
/// sequential [`PendingBlock::mine`] would find. Attempt counts reported in
/// budget errors are approximate.
pub fn mine_parallel(pending: PendingBlock, difficulty: u32, options: &MineOptions) -> Result<Block> {
    let difficulty = Difficulty::new(difficulty)?;
    if difficulty.is_met_by_hex(pending.hash()) {
        return Ok(pending.seal());
    }
    let start = pending
        .nonce()
        .checked_add(1)
        .ok_or(LedgerError::NonceExhausted)?;

    let prefix = pending.digest_prefix();
    let attempts = AtomicU64::new(0);

    // Rayon splits the range into contiguous chunks, so every worker keeps
    // crossing multiples of the check interval.
    let found = (start..u64::MAX).into_par_iter().find_map_any(|nonce| {
        let hash = finish_digest(&prefix, nonce);
        if difficulty.is_met_by(&hash) {
            return Some(Ok((nonce, hash)));
        }
        if nonce % BUDGET_CHECK_INTERVAL == 0 {
            let seen = attempts.fetch_add(BUDGET_CHECK_INTERVAL, Ordering::Relaxed)
                + BUDGET_CHECK_INTERVAL;
            if let Err(err) = options.check(seen) {
                return Some(Err(err));
            }
        }
        None
    });

    let (nonce, hash) = found.ok_or(LedgerError::NonceExhausted)??;
    info!(
        "Mined block {} in parallel with nonce {} and hash {}",
        pending.index(),
        nonce,
        hex::encode(hash)
    );
    Ok(pending.seal_with(nonce, &hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::CancelToken;
    use std::time::Duration;

    #[test]
    fn mine_parallel_example() {
        let pending = PendingBlock::new(1, "Mining test data", "0");
        let block = mine_parallel(pending, 4, &MineOptions::default()).unwrap();
        assert!(block.hash().starts_with("0000"));
        assert!(block.verify_hash());
        assert!(block.nonce() > 0);
    }

    #[test]
    fn mine_parallel_zero_difficulty_is_a_no_op() {
        let pending = PendingBlock::with_timestamp(3, 1_600_000_000, "x", "y");
        let hash = pending.hash().to_string();
        let block = mine_parallel(pending, 0, &MineOptions::default()).unwrap();
        assert_eq!(block.nonce(), 0);
        assert_eq!(block.hash(), hash);
    }

    #[test]
    fn mine_parallel_times_out() {
        let pending = PendingBlock::new(1, "unreachable", "0");
        let options = MineOptions::default().with_timeout(Duration::from_millis(20));
        let err = mine_parallel(pending, 64, &options).unwrap_err();
        assert!(matches!(err, LedgerError::MiningTimeout { .. }));
    }

    #[test]
    fn mine_parallel_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let options = MineOptions::default().with_cancel(token);
        let err = mine_parallel(PendingBlock::new(1, "x", "0"), 64, &options).unwrap_err();
        assert!(matches!(err, LedgerError::MiningCancelled { .. }));
    }

    #[test]
    fn mine_parallel_rejects_invalid_difficulty() {
        let err = mine_parallel(PendingBlock::new(1, "x", "0"), 100, &MineOptions::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidDifficulty { requested: 100, .. }));
    }
}
