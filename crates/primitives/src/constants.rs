//! Constants for magic numbers used across the consensus encodings.

/// Version carried in every block header.  Any change to the encoding of
/// blocks, extrinsics or seals changes block ids and digests, so it must bump
/// this.
pub const BLOCK_ENCODING_VERSION: u16 = 1;

/// Key prefix of the balances namespace in the state.
pub const BALANCE_KEY_PREFIX: &[u8] = b"bal/";

/// Largest value the executor lets a single `Set` write.
pub const MAX_VALUE_LEN: usize = 16 * 1024;

/// Default depth below the canonical tip at which blocks become final.
pub const DEFAULT_FINALITY_DEPTH: u64 = 32;

/// Default bound on the length of either side of a reorg.
pub const DEFAULT_MAX_REORG_DEPTH: usize = 1024;
