//! Types relating to blocks, extrinsics and the chain state they build.

pub mod block;
pub mod chain_tip;
pub mod extrinsic;
pub mod header;
pub mod state;
pub mod state_op;

pub mod prelude;
