//! Global consensus parameters for the chain.

use serde::{Deserialize, Serialize};

use crate::{
    buf::Buf32,
    constants::{DEFAULT_FINALITY_DEPTH, DEFAULT_MAX_REORG_DEPTH},
};

/// Rule we use to decide if a block is correctly sealed.  Chosen once at
/// startup, every node on a network must agree on it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SealRule {
    /// Proof of work.  The seal carries its own difficulty, which must be at
    /// least `min_difficulty`, and that difficulty is the block's weight.
    WorkThreshold { min_difficulty: u64 },

    /// BIP340 schnorr signature from one of a fixed set of x-only pubkeys.
    /// With `round_robin` only the authority at `(height - 1) % n` may sign.
    Authority {
        authorities: Vec<Buf32>,
        #[serde(default)]
        round_robin: bool,
    },
}

/// Consensus parameters that don't change for the lifetime of the network
/// (unless there's some weird hard fork).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConsensusParams {
    /// Rule we use to decide if a block is correctly sealed.
    pub seal_rule: SealRule,

    /// Max number of extrinsics in a block.
    pub max_block_extrinsics: u32,

    /// Max encoded size of a single extrinsic payload.
    pub max_extrinsic_size: u32,
}

/// What to do with a block whose parent we haven't seen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Keep it around until the parent shows up, up to some capacity.
    Hold { capacity: usize },

    /// Reject it outright.
    Drop,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        Self::Hold { capacity: 256 }
    }
}

/// Node-local parameters that are used to make the chain work but don't
/// strictly have to be pre-agreed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunParams {
    /// How far below the canonical tip a block has to be before it's final.
    #[serde(default = "default_finality_depth")]
    pub finality_depth: u64,

    /// Reorgs retracting more blocks than this are logged loudly.  Fork choice
    /// still follows the best tip.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: usize,

    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    /// Number of rejected block ids we remember so we don't revalidate them.
    #[serde(default = "default_invalid_cache_size")]
    pub invalid_cache_size: usize,
}

fn default_finality_depth() -> u64 {
    DEFAULT_FINALITY_DEPTH
}

fn default_max_reorg_depth() -> usize {
    DEFAULT_MAX_REORG_DEPTH
}

fn default_invalid_cache_size() -> usize {
    1024
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            finality_depth: default_finality_depth(),
            max_reorg_depth: default_max_reorg_depth(),
            orphan_policy: OrphanPolicy::default(),
            invalid_cache_size: default_invalid_cache_size(),
        }
    }
}

/// Combined set of parameters across all the consensus logic.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Params {
    pub consensus: ConsensusParams,
    #[serde(default)]
    pub run: RunParams,
}

impl Params {
    pub fn consensus(&self) -> &ConsensusParams {
        &self.consensus
    }

    pub fn run(&self) -> &RunParams {
        &self.run
    }
}
