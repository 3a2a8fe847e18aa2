pub use crate::{
    block::Block,
    chain_tip::ChainTip,
    extrinsic::{Call, Extrinsic},
    header::{BlockHeader, EngineTag, HeaderTemplate, Seal},
    state::State,
};
