use tessera_primitives::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("tried to mark unknown block {0} as {1}")]
    UnknownBlock(BlockId, &'static str),

    #[error("storage io: {0}")]
    StorageIo(String),
}
