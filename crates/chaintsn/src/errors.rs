use tessera_primitives::prelude::*;
use thiserror::Error;

/// Errors for block state transition.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TsnError {
    #[error("extrinsic {index} ({id}) failed: {source}")]
    Extrinsic {
        index: usize,
        id: ExtrinsicId,
        #[source]
        source: ExtrinsicError,
    },
}

impl TsnError {
    /// Index within the block of the extrinsic that failed.
    pub fn index(&self) -> usize {
        match self {
            Self::Extrinsic { index, .. } => *index,
        }
    }
}

/// Reasons a single extrinsic can fail to apply.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ExtrinsicError {
    #[error("payload is not a valid call")]
    InvalidPayload,

    #[error("empty key")]
    EmptyKey,

    #[error("key is in the reserved balance namespace")]
    ReservedKey,

    #[error("value too large ({0} bytes, max {1})")]
    ValueTooLarge(usize, usize),

    #[error("missing key")]
    MissingKey,

    #[error("zero amount")]
    ZeroAmount,

    #[error("insufficient balance on {0} (have {1}, need {2})")]
    InsufficientBalance(Buf32, u64, u64),

    #[error("balance overflow on {0}")]
    BalanceOverflow(Buf32),

    #[error("malformed balance entry for {0}")]
    MalformedBalance(Buf32),
}
