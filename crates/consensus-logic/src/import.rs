//! Checks run on blocks coming in from outside before fork choice sees them.

use std::{fmt, sync::Arc};

use tessera_chaintsn::transition;
use tessera_primitives::{constants::BLOCK_ENCODING_VERSION, params::Params, prelude::*};
use tessera_state::prelude::*;
use tracing::*;

use crate::{
    engine::{ConsensusEngine, SealEngine},
    errors::{DigestKind, ImportError},
    fork_choice_manager::{ForkChoiceOutcome, IgnoreReason},
};

/// Where a block is in the import pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImportStage {
    Received,
    ConsensusChecking,
    StateApplying,
    Accepted,
    ForkChoiceSubmitted,
    Rejected,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::ConsensusChecking => "consensus-checking",
            Self::StateApplying => "state-applying",
            Self::Accepted => "accepted",
            Self::ForkChoiceSubmitted => "fork-choice-submitted",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// What happened to a block we were asked to import.
#[derive(Debug)]
pub enum ImportResult {
    /// Valid and handed to fork choice, which decided this.
    Accepted(ForkChoiceOutcome),

    /// Nothing to do with it, it's not invalid though.
    Ignored(IgnoreReason),

    /// We don't have its parent yet, so we're holding onto it.
    PendingParent,

    Rejected(ImportError),
}

impl ImportResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns if the canonical tip moved because of this.
    pub fn changed_canonical(&self) -> bool {
        matches!(self, Self::Accepted(o) if o.changed_canonical())
    }
}

/// Checks the parts of a block that don't need any other context.
pub fn check_block_shape(block: &Block, params: &Params) -> Result<(), ImportError> {
    let header = block.header();
    if header.version() != BLOCK_ENCODING_VERSION {
        return Err(ImportError::MalformedBlock(format!(
            "unsupported encoding version {}",
            header.version()
        )));
    }

    let consensus = params.consensus();
    let n = block.extrinsics().len();
    if n > consensus.max_block_extrinsics as usize {
        return Err(ImportError::MalformedBlock(format!(
            "{n} extrinsics, limit {}",
            consensus.max_block_extrinsics
        )));
    }

    if let Some((i, e)) = block
        .extrinsics()
        .iter()
        .enumerate()
        .find(|(_, e)| e.encoded_size() > consensus.max_extrinsic_size as usize)
    {
        return Err(ImportError::MalformedBlock(format!(
            "extrinsic {i} is {} bytes, limit {}",
            e.encoded_size(),
            consensus.max_extrinsic_size
        )));
    }

    if header.height() == 0 || header.parent().is_null() {
        return Err(ImportError::MalformedBlock("not importing a genesis block".into()));
    }

    Ok(())
}

/// Runs the consensus and state transition checks for a block on top of its
/// parent, producing the tip to submit to fork choice.
pub fn validate_block(
    engine: &ConsensusEngine,
    block: Arc<Block>,
    parent: &ChainTip,
) -> Result<ChainTip, ImportError> {
    let blkid = block.get_blockid();
    let header = block.header();

    if header.height() != parent.height() + 1 {
        return Err(ImportError::MalformedBlock(format!(
            "height {} on parent at height {}",
            header.height(),
            parent.height()
        )));
    }

    trace!(%blkid, stage = %ImportStage::ConsensusChecking, "checking seal");
    engine.validate_seal(header, parent.header(), header.state_digest())?;
    let block_weight = engine.block_weight(header)?;

    trace!(%blkid, stage = %ImportStage::StateApplying, "executing block");
    let computed = block.compute_extrinsics_digest();
    if computed != *header.extrinsics_digest() {
        return Err(ImportError::DigestMismatch {
            kind: DigestKind::Extrinsics,
            claimed: *header.extrinsics_digest(),
            computed,
        });
    }

    let output = transition::apply_block_extrinsics(parent.state(), block.extrinsics())?;
    if output.state_digest != *header.state_digest() {
        return Err(ImportError::DigestMismatch {
            kind: DigestKind::State,
            claimed: *header.state_digest(),
            computed: output.state_digest,
        });
    }

    Ok(ChainTip::new(block, Arc::new(output.state), block_weight))
}
