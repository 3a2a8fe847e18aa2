//! Builders for chains and a chain manager over in-memory storage.

use std::sync::Arc;

use tessera_chaintsn::transition;
use tessera_consensus_logic::{
    chain_manager::{init_chain_manager, ChainManager},
    engine::{ConsensusEngine, SealContext, SealEngine},
};
use tessera_db::stubs::chain::StubChainDb;
use tessera_mempool::{PoolConfig, PriorityPool};
use tessera_primitives::{params::Params, prelude::*};
use tessera_state::prelude::*;

pub type TestChainManager = ChainManager<Arc<StubChainDb>, Arc<PriorityPool>>;

/// Chain manager along with handles to its storage and pool.
pub struct TestNode {
    pub manager: Arc<TestChainManager>,
    pub db: Arc<StubChainDb>,
    pub pool: Arc<PriorityPool>,
}

impl TestNode {
    /// Fresh node starting from an empty genesis state.
    pub fn new(params: Params) -> Self {
        Self::with_db(params, Arc::new(StubChainDb::new()))
    }

    /// Node on top of an existing database, like after a restart.
    pub fn with_db(params: Params, db: Arc<StubChainDb>) -> Self {
        let pool = Arc::new(PriorityPool::new(PoolConfig::default()));
        let manager = init_chain_manager(Arc::new(params), db.clone(), pool.clone(), State::new())
            .expect("test: init chain manager");
        Self {
            manager: Arc::new(manager),
            db,
            pool,
        }
    }

    /// The canonical tip with its state.
    pub fn tip(&self) -> ChainTip {
        self.manager
            .canonical_chain_tip()
            .expect("test: missing canonical tip")
    }
}

/// How to seal blocks built with [`build_block`].
#[derive(Clone, Debug, Default)]
pub struct SealOpts {
    pub work_difficulty: Option<u64>,
    pub authoring_key: Option<Buf32>,
}

impl SealOpts {
    pub fn work(difficulty: u64) -> Self {
        Self {
            work_difficulty: Some(difficulty),
            authoring_key: None,
        }
    }

    pub fn authority(key: Buf32) -> Self {
        Self {
            work_difficulty: None,
            authoring_key: Some(key),
        }
    }
}

/// Builds a correctly sealed block on a parent.  All the extrinsics must
/// apply.
pub fn build_block(
    params: &Params,
    parent: &ChainTip,
    exts: Vec<Extrinsic>,
    opts: &SealOpts,
) -> ChainTip {
    let engine = ConsensusEngine::from_seal_rule(&params.consensus().seal_rule);
    let out = transition::apply_block_extrinsics(parent.state(), &exts)
        .expect("test: extrinsics must apply");

    let tmplt = HeaderTemplate::new(
        parent.blkid(),
        parent.height() + 1,
        out.state_digest,
        out.extrinsics_digest,
    );
    let ctx = SealContext {
        authoring_key: opts.authoring_key,
        work_difficulty: opts.work_difficulty,
        ..Default::default()
    };
    let seal = engine
        .seal(&tmplt, parent.header(), &out.state_digest, &ctx)
        .expect("test: seal block");

    let header = tmplt.complete_with(seal);
    let weight = engine.block_weight(&header).expect("test: block weight");
    ChainTip::new(
        Arc::new(Block::new(header, exts)),
        Arc::new(out.state),
        weight,
    )
}

/// Builds `n` empty blocks on top of a parent, returning them in order.
pub fn build_chain(params: &Params, parent: &ChainTip, n: usize, opts: &SealOpts) -> Vec<ChainTip> {
    let mut out: Vec<ChainTip> = Vec::with_capacity(n);
    for _ in 0..n {
        let tip = build_block(params, out.last().unwrap_or(parent), Vec::new(), opts);
        out.push(tip);
    }
    out
}

pub fn set_ext(key: &[u8], value: &[u8], priority: u64) -> Extrinsic {
    Extrinsic::from_call(
        &Call::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        },
        priority,
    )
}

pub fn mint_ext(account: Buf32, amount: u64) -> Extrinsic {
    Extrinsic::from_call(&Call::Mint { account, amount }, 0)
}

pub fn transfer_ext(from: Buf32, to: Buf32, amount: u64) -> Extrinsic {
    Extrinsic::from_call(&Call::Transfer { from, to, amount }, 0)
}
