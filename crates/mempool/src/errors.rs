use tessera_primitives::prelude::*;
use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

/// Reasons the pool refuses an extrinsic.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PoolError {
    #[error("extrinsic {0} already in pool")]
    AlreadyKnown(ExtrinsicId),

    #[error("priority {priority} below minimum {minimum}")]
    PriorityTooLow { priority: u64, minimum: u64 },

    #[error("pool is full: current={current}, limit={limit}")]
    PoolFull { current: usize, limit: usize },

    #[error("extrinsic size {size} bytes exceeds limit {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}
