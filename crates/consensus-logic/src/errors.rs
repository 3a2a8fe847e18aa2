use tessera_chaintsn::errors::TsnError;
use tessera_db::errors::DbError;
use tessera_primitives::prelude::*;
use tessera_state::header::EngineTag;
use thiserror::Error;

use crate::import::ImportStage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("block {0} missing from database")]
    MissingBlock(BlockId),

    #[error("state for block {0} missing from database")]
    MissingBlockState(BlockId),

    #[error("unable to find reorg {0} -> {1}")]
    UnableToFindReorg(BlockId, BlockId),

    #[error("chaintip: {0}")]
    ChainTree(#[from] ChainTreeError),

    #[error("db: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum ChainTreeError {
    #[error("tried to attach blkid {0} but missing parent blkid {1}")]
    AttachMissingParent(BlockId, BlockId),

    #[error("tried to attach blkid {0} at height {1} on parent at height {2}")]
    AttachBadHeight(BlockId, u64, u64),

    #[error("tried to finalize unknown block {0}")]
    MissingBlock(BlockId),

    #[error("tried to finalize block {0} not descended from finalized tip")]
    NotDescendant(BlockId),
}

/// Errors from checking or producing a seal.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConsensusError {
    #[error("seal from engine {0:?}, expected {1:?}")]
    WrongEngine(EngineTag, EngineTag),

    #[error("malformed seal: {0}")]
    MalformedSeal(String),

    #[error("header parent {0} does not match parent header {1}")]
    ParentMismatch(BlockId, BlockId),

    #[error("header height {0} does not follow parent height {1}")]
    HeightMismatch(u64, u64),

    #[error("seal difficulty {0} below minimum {1}")]
    InsufficientDifficulty(u64, u64),

    #[error("seal hash does not meet difficulty {0}")]
    ThresholdNotMet(u64),

    #[error("unknown authority index {0}")]
    UnknownAuthority(u32),

    #[error("authority {0} sealed block at height {1}, expected authority {2}")]
    WrongAuthority(u32, u64, u32),

    #[error("bad signature from authority {0}")]
    BadSignature(u32),

    #[error("no authoring key available")]
    MissingAuthoringKey,

    #[error("authoring key is not one of the authorities")]
    NotAnAuthority,

    #[error("not our turn to seal height {0}")]
    NotOurTurn(u64),

    #[error("seal search cancelled")]
    SealCancelled,

    #[error("seal search timed out")]
    SealTimeout,

    #[error("seal search exhausted nonces")]
    NoncesExhausted,
}

impl ConsensusError {
    /// Returns if trying to seal again later could work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SealCancelled | Self::SealTimeout | Self::NoncesExhausted | Self::NotOurTurn(_)
        )
    }
}

/// Which digest didn't match during import.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DigestKind {
    Extrinsics,
    State,
}

/// Why a block was rejected on import.  None of these are worth retrying.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("unknown parent {0}")]
    UnknownParent(BlockId),

    #[error("block previously found invalid")]
    KnownInvalid,

    #[error("consensus: {0}")]
    ConsensusRejected(#[from] ConsensusError),

    #[error("state transition: {0}")]
    StateTransition(#[from] TsnError),

    #[error("{kind:?} digest mismatch (claimed {claimed}, computed {computed})")]
    DigestMismatch {
        kind: DigestKind,
        claimed: Buf32,
        computed: Buf32,
    },
}

impl ImportError {
    /// Stage of the import pipeline the block was rejected at.
    pub fn stage(&self) -> ImportStage {
        match self {
            Self::MalformedBlock(_) | Self::UnknownParent(_) | Self::KnownInvalid => {
                ImportStage::Received
            }
            Self::ConsensusRejected(_) => ImportStage::ConsensusChecking,
            Self::StateTransition(_) | Self::DigestMismatch { .. } => ImportStage::StateApplying,
        }
    }

    /// Returns if the header itself is bad, so we should remember its id.
    /// The id only commits to the extrinsics through their digest, so a body
    /// that doesn't match says nothing about the header.
    pub fn is_block_invalid(&self) -> bool {
        match self {
            Self::ConsensusRejected(_) | Self::StateTransition(_) => true,
            Self::DigestMismatch { kind, .. } => *kind == DigestKind::State,
            Self::MalformedBlock(_) | Self::UnknownParent(_) | Self::KnownInvalid => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("no extrinsics to include and empty blocks disabled")]
    NothingToAuthor,

    #[error("gave up after {0} attempts")]
    TooManyAttempts(u32),

    #[error("seal: {0}")]
    Seal(#[from] ConsensusError),

    #[error("chain: {0}")]
    Chain(#[from] Error),
}

impl AuthoringError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NothingToAuthor | Self::TooManyAttempts(_) => true,
            Self::Seal(e) => e.is_retryable(),
            _ => false,
        }
    }
}
