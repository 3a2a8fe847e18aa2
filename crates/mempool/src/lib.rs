//! Pool of extrinsics waiting to be included in a block.

mod errors;
mod priority;
mod traits;

pub use errors::{PoolError, PoolResult};
pub use priority::{PoolConfig, PriorityPool};
pub use traits::TransactionPool;
