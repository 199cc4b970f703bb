pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_DATA: &str = "Genesis Block";
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
/// Nonces tried between deadline/cancellation polls. Must be a power of two.
pub const BUDGET_CHECK_INTERVAL: u64 = 1 << 12;
