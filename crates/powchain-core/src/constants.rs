pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Byte every leading position of a mined digest must equal under the default policy.
pub const POW_MARKER: u8 = b'0';
pub const POW_TARGET_DIFFICULTY: usize = 4;
/// Distinct `i32` nonces; a search never tries more than this many.
pub const NONCE_SPACE: u64 = 1 << 32;
pub const DEADLINE_CHECK_INTERVAL: u64 = 1024;
