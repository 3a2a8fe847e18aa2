use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tessera_consensus_logic::{
    chain_manager::{init_chain_manager, ChainManager},
    import::ImportResult,
};
use tessera_db::{stubs::chain::StubChainDb, traits::BlockStore, DbResult};
use tessera_mempool::{PoolConfig, PriorityPool};
use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tessera_test_utils::{
    chain::{build_block, set_ext, SealOpts, TestNode},
    params::gen_params,
};

/// Stalls the write of one block until told to go on.
struct Gate {
    blkid: BlockId,
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

/// Store that can hold up a single block write.
#[derive(Default)]
struct GatedDb {
    inner: StubChainDb,
    gate: Mutex<Option<Gate>>,
}

impl GatedDb {
    fn wait_at(&self, blkid: BlockId) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock() = Some(Gate {
            blkid,
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

impl BlockStore for GatedDb {
    fn put_block_and_state(&self, block: Arc<Block>, state: Arc<State>) -> DbResult<()> {
        let gate = {
            let mut gate = self.gate.lock();
            match gate.as_ref() {
                Some(g) if g.blkid == block.get_blockid() => gate.take(),
                _ => None,
            }
        };

        if let Some(gate) = gate {
            gate.entered.send(()).expect("test: signal gate");
            gate.release.recv().expect("test: wait on gate");
        }

        self.inner.put_block_and_state(block, state)
    }

    fn get_block(&self, id: &BlockId) -> DbResult<Option<Arc<Block>>> {
        self.inner.get_block(id)
    }

    fn get_state(&self, id: &BlockId) -> DbResult<Option<Arc<State>>> {
        self.inner.get_state(id)
    }

    fn get_blocks_at_height(&self, height: u64) -> DbResult<Vec<BlockId>> {
        self.inner.get_blocks_at_height(height)
    }

    fn set_canonical(&self, id: &BlockId) -> DbResult<()> {
        self.inner.set_canonical(id)
    }

    fn get_canonical_tip(&self) -> DbResult<Option<BlockId>> {
        self.inner.get_canonical_tip()
    }

    fn set_finalized(&self, id: &BlockId) -> DbResult<()> {
        self.inner.set_finalized(id)
    }

    fn get_finalized_tip(&self) -> DbResult<Option<BlockId>> {
        self.inner.get_finalized_tip()
    }
}

type GatedManager = ChainManager<Arc<GatedDb>, Arc<PriorityPool>>;

#[test]
fn test_child_imported_while_parent_is_stored() {
    let params = gen_params();
    let db = Arc::new(GatedDb::default());
    let pool = Arc::new(PriorityPool::new(PoolConfig::default()));
    let manager: Arc<GatedManager> = Arc::new(
        init_chain_manager(Arc::new(params.clone()), db.clone(), pool, State::new())
            .expect("test: init chain manager"),
    );

    let genesis = manager.canonical_chain_tip().expect("test: genesis tip");
    let b1 = build_block(&params, &genesis, vec![], &SealOpts::default());
    let b2 = build_block(&params, &b1, vec![set_ext(b"k", b"2", 0)], &SealOpts::default());
    assert!(manager
        .import_block(b1.block().as_ref().clone())
        .unwrap()
        .changed_canonical());

    let (entered, release) = db.wait_at(b2.blkid());
    let b3 = build_block(&params, &b2, vec![set_ext(b"k", b"3", 0)], &SealOpts::default());

    let m = manager.clone();
    let blk = b2.block().as_ref().clone();
    let parent_thread = thread::spawn(move || m.import_block(blk));
    entered.recv().expect("test: parent write started");

    let m = manager.clone();
    let blk = b3.block().as_ref().clone();
    let child_thread = thread::spawn(move || m.import_block(blk));

    // Give the child a chance to run into the parent's write.
    thread::sleep(Duration::from_millis(50));
    release.send(()).expect("test: release parent write");

    let parent_res = parent_thread.join().expect("test: parent thread").unwrap();
    let child_res = child_thread.join().expect("test: child thread").unwrap();
    assert!(parent_res.is_accepted());
    assert!(child_res.is_accepted(), "child result {child_res:?}");

    assert!(manager.is_seen_block(&b3.blkid()));
    assert_eq!(manager.canonical_tip(), b3.blkid());
    assert_eq!(manager.num_orphans(), 0);
}

/// Blocks in a valid import order: a shared base with three competing
/// branches of different weights and depths.
fn make_tree(params: &tessera_primitives::params::Params, genesis: &ChainTip) -> Vec<ChainTip> {
    let b1 = build_block(params, genesis, vec![set_ext(b"base", b"1", 0)], &SealOpts::default());
    let b2a = build_block(params, &b1, vec![set_ext(b"a", b"1", 0)], &SealOpts::work(10));
    let b2b = build_block(params, &b1, vec![set_ext(b"b", b"1", 0)], &SealOpts::work(12));
    let b2c = build_block(params, &b1, vec![set_ext(b"c", b"1", 0)], &SealOpts::work(3));
    let b3a = build_block(params, &b2a, vec![set_ext(b"a", b"2", 0)], &SealOpts::work(5));
    let b3c = build_block(params, &b2c, vec![], &SealOpts::work(4));
    let b4c = build_block(params, &b3c, vec![], &SealOpts::work(4));
    let b4a = build_block(params, &b3a, vec![], &SealOpts::work(2));
    vec![b1, b2a, b2b, b2c, b3a, b3c, b4c, b4a]
}

#[test]
fn test_concurrent_imports_match_serial() {
    let params = gen_params();

    let serial = TestNode::new(params.clone());
    let blocks = make_tree(&params, &serial.tip());
    for b in &blocks {
        serial
            .manager
            .import_block(b.block().as_ref().clone())
            .unwrap();
    }
    let expected = serial.manager.status();

    for round in 0..8 {
        let node = TestNode::new(params.clone());
        let n = blocks.len();

        // Every thread imports everything in its own order, children before
        // parents included.
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = node.manager.clone();
                let mut order: Vec<Block> =
                    blocks.iter().map(|b| b.block().as_ref().clone()).collect();
                order.rotate_left((round + t * 3) % n);
                if t % 2 == 1 {
                    order.reverse();
                }
                thread::spawn(move || {
                    for blk in order {
                        let res = manager.import_block(blk).expect("test: import block");
                        assert!(
                            !matches!(res, ImportResult::Rejected(_)),
                            "test: rejected {res:?}"
                        );
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("test: import thread");
        }

        assert_eq!(node.manager.status(), expected);
        assert_eq!(node.manager.num_orphans(), 0);
        for b in &blocks {
            assert!(node.manager.is_seen_block(&b.blkid()));
        }
        assert_eq!(node.db.num_blocks(), n + 1);
    }
}
