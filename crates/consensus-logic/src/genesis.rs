use std::sync::Arc;

use tessera_db::traits::BlockStore;
use tessera_primitives::{params::Params, prelude::*};
use tessera_state::{block::compute_extrinsics_digest, prelude::*};
use tracing::*;

use crate::engine::{ConsensusEngine, SealEngine};

/// Builds the genesis block on top of some initial state.  It has no parent,
/// no extrinsics, and an empty seal, and it's never validated, just trusted.
pub fn make_genesis_tip(params: &Params, initial_state: State) -> ChainTip {
    let engine = ConsensusEngine::from_seal_rule(&params.consensus().seal_rule);
    let tmplt = HeaderTemplate::new(
        BlockId::null(),
        0,
        initial_state.digest(),
        compute_extrinsics_digest(&[]),
    );
    let header = tmplt.complete_with(Seal::new(engine.tag(), Vec::new()));
    ChainTip::new(
        Arc::new(Block::new(header, Vec::new())),
        Arc::new(initial_state),
        0,
    )
}

/// Inserts the genesis block into the database and points the canonical and
/// finalized tips at it.
pub fn init_genesis_states<S: BlockStore>(
    params: &Params,
    initial_state: State,
    store: &S,
) -> anyhow::Result<ChainTip> {
    debug!("preparing database genesis state!");

    let tip = make_genesis_tip(params, initial_state);
    let blkid = tip.blkid();

    store.put_block_and_state(tip.block().clone(), tip.state().clone())?;
    store.set_canonical(&blkid)?;
    store.set_finalized(&blkid)?;
    store.flush()?;

    info!(%blkid, state_digest = %tip.header().state_digest(), "wrote genesis block");
    Ok(tip)
}
