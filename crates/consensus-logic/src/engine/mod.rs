//! Consensus engines, which decide whether a block is correctly sealed and
//! produce seals for blocks we author.

use std::time::Instant;

use tessera_primitives::{params::SealRule, prelude::*};
use tessera_state::prelude::*;

use crate::errors::ConsensusError;

mod authority;
mod cancel;
mod work;

pub use authority::{
    compute_pubkey, sign_schnorr_sig, verify_schnorr_sig, AuthorityEngine, AuthorityProof,
};
pub use cancel::CancelToken;
pub use work::{WorkEngine, WorkProof, CANCEL_POLL_INTERVAL};

/// Local inputs to producing a seal.
#[derive(Clone, Debug, Default)]
pub struct SealContext {
    /// Checked while searching, set when the block we're sealing is moot.
    pub cancel: CancelToken,

    /// Give up with [`ConsensusError::SealTimeout`] after this.
    pub deadline: Option<Instant>,

    /// Secret key for engines that sign.
    pub authoring_key: Option<Buf32>,

    /// Difficulty to mine at, if above the minimum.
    pub work_difficulty: Option<u64>,

    /// First nonce to try.
    pub nonce_start: u64,
}

impl SealContext {
    /// Returns an error if the search should stop.
    pub(crate) fn check_interrupt(&self) -> Result<(), ConsensusError> {
        if self.cancel.is_cancelled() {
            return Err(ConsensusError::SealCancelled);
        }

        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ConsensusError::SealTimeout);
        }

        Ok(())
    }
}

/// Common interface to the consensus rules.  Engines hold no mutable state,
/// so they can be shared between threads freely.
pub trait SealEngine {
    /// Tag written into the seals this engine produces.
    fn tag(&self) -> EngineTag;

    /// Checks that a header's seal is acceptable on top of its parent, given
    /// the state digest it claims to produce.  Failure means the block is
    /// invalid.
    fn validate_seal(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
    ) -> Result<(), ConsensusError>;

    /// Produces a seal for a header candidate.  May take a while, watches the
    /// context's cancel token and deadline.
    fn seal(
        &self,
        candidate: &HeaderTemplate,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
        ctx: &SealContext,
    ) -> Result<Seal, ConsensusError>;

    /// Weight the block contributes to its chain for fork choice.  Only
    /// meaningful for headers that passed validation.
    fn block_weight(&self, header: &BlockHeader) -> Result<u128, ConsensusError>;
}

/// The engines we support, picked once at startup from the seal rule.
#[derive(Clone, Debug)]
pub enum ConsensusEngine {
    Work(WorkEngine),
    Authority(AuthorityEngine),
}

impl ConsensusEngine {
    pub fn from_seal_rule(rule: &SealRule) -> Self {
        match rule {
            SealRule::WorkThreshold { min_difficulty } => {
                Self::Work(WorkEngine::new(*min_difficulty))
            }
            SealRule::Authority {
                authorities,
                round_robin,
            } => Self::Authority(AuthorityEngine::new(authorities.clone(), *round_robin)),
        }
    }

    fn inner(&self) -> &dyn SealEngine {
        match self {
            Self::Work(e) => e,
            Self::Authority(e) => e,
        }
    }
}

impl SealEngine for ConsensusEngine {
    fn tag(&self) -> EngineTag {
        self.inner().tag()
    }

    fn validate_seal(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
    ) -> Result<(), ConsensusError> {
        self.inner()
            .validate_seal(header, parent, resulting_state_digest)
    }

    fn seal(
        &self,
        candidate: &HeaderTemplate,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
        ctx: &SealContext,
    ) -> Result<Seal, ConsensusError> {
        self.inner()
            .seal(candidate, parent, resulting_state_digest, ctx)
    }

    fn block_weight(&self, header: &BlockHeader) -> Result<u128, ConsensusError> {
        self.inner().block_weight(header)
    }
}

/// Checks the parts of a seal every engine cares about: the tag, and that the
/// header actually sits on top of the parent it's being checked against.
pub(crate) fn check_common(
    tag: EngineTag,
    header: &BlockHeader,
    parent: &BlockHeader,
) -> Result<(), ConsensusError> {
    if header.seal().tag() != tag {
        return Err(ConsensusError::WrongEngine(header.seal().tag(), tag));
    }

    let parent_id = parent.get_blockid();
    if *header.parent() != parent_id {
        return Err(ConsensusError::ParentMismatch(*header.parent(), parent_id));
    }

    if header.height() != parent.height() + 1 {
        return Err(ConsensusError::HeightMismatch(header.height(), parent.height()));
    }

    Ok(())
}

pub(crate) fn check_candidate(
    candidate: &HeaderTemplate,
    parent: &BlockHeader,
) -> Result<(), ConsensusError> {
    let parent_id = parent.get_blockid();
    if *candidate.parent() != parent_id {
        return Err(ConsensusError::ParentMismatch(*candidate.parent(), parent_id));
    }

    if candidate.height() != parent.height() + 1 {
        return Err(ConsensusError::HeightMismatch(candidate.height(), parent.height()));
    }

    Ok(())
}

pub(crate) fn decode_proof<T: borsh::BorshDeserialize>(seal: &Seal) -> Result<T, ConsensusError> {
    borsh::from_slice(seal.proof()).map_err(|e| ConsensusError::MalformedSeal(e.to_string()))
}
