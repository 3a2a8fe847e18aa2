//! Ties import, authoring, fork choice, storage and the pool together.

use std::{collections::HashSet, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;
use tessera_db::{traits::BlockStore, DbError};
use tessera_mempool::TransactionPool;
use tessera_primitives::{
    params::{OrphanPolicy, Params},
    prelude::*,
};
use tessera_state::prelude::*;
use tokio::sync::watch;
use tracing::*;

use crate::{
    block_assembly::{self, AuthoredBlock, AuthoringConfig},
    chain_tree::ChainTree,
    engine::{CancelToken, ConsensusEngine, SealEngine},
    errors::*,
    fork_choice_manager::{ForkChoiceManager, ForkChoiceOutcome, IgnoreReason},
    genesis,
    import::{self, ImportResult, ImportStage},
    orphans::OrphanPool,
    status::CanonicalStatus,
};

/// Entry point to the chain core.  Shared between threads behind an `Arc`,
/// all fork choice changes go through a single lock.
pub struct ChainManager<S: BlockStore, P: TransactionPool> {
    params: Arc<Params>,
    engine: ConsensusEngine,
    store: S,
    pool: P,

    fcm: Mutex<ForkChoiceManager>,

    /// `None` if we drop orphans.
    orphans: Option<Mutex<OrphanPool>>,

    /// Blocks we've found to be invalid, so we don't check them again.
    invalid_blocks: Mutex<LruCache<BlockId, ()>>,

    status_tx: watch::Sender<CanonicalStatus>,

    /// Last finalized block we managed to write out.  Only touched with the
    /// fork choice lock held.
    stored_finalized: Mutex<BlockId>,

    /// Cancel tokens for seal attempts in progress, cancelled whenever the
    /// canonical tip moves.
    authoring_tokens: Mutex<Vec<CancelToken>>,
}

fn make_status(fcm: &ForkChoiceManager) -> CanonicalStatus {
    CanonicalStatus {
        tip: *fcm.cur_best_block(),
        height: fcm.cur_height(),
        cumulative_weight: fcm.cur_cumulative_weight(),
        finalized: *fcm.finalized_tip(),
    }
}

impl<S: BlockStore, P: TransactionPool> ChainManager<S, P> {
    fn new(params: Arc<Params>, store: S, pool: P, fcm: ForkChoiceManager) -> Self {
        let engine = ConsensusEngine::from_seal_rule(&params.consensus().seal_rule);

        let orphans = match params.run().orphan_policy {
            OrphanPolicy::Hold { capacity } => Some(Mutex::new(OrphanPool::new(capacity))),
            OrphanPolicy::Drop => None,
        };

        let cache_size =
            NonZeroUsize::new(params.run().invalid_cache_size).unwrap_or(NonZeroUsize::MIN);
        let (status_tx, _) = watch::channel(make_status(&fcm));
        let stored_finalized = Mutex::new(*fcm.finalized_tip());

        Self {
            params,
            engine,
            store,
            pool,
            fcm: Mutex::new(fcm),
            orphans,
            invalid_blocks: Mutex::new(LruCache::new(cache_size)),
            status_tx,
            stored_finalized,
            authoring_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn canonical_tip(&self) -> BlockId {
        *self.fcm.lock().cur_best_block()
    }

    pub fn finalized_tip(&self) -> BlockId {
        *self.fcm.lock().finalized_tip()
    }

    /// Returns the canonical tip along with its state.
    pub fn canonical_chain_tip(&self) -> Option<ChainTip> {
        self.fcm.lock().cur_tip().cloned()
    }

    pub fn status(&self) -> CanonicalStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CanonicalStatus> {
        self.status_tx.subscribe()
    }

    /// Returns if a block is in the unfinalized tree (or is the finalized
    /// root).
    pub fn is_seen_block(&self, id: &BlockId) -> bool {
        self.fcm.lock().is_seen_block(id)
    }

    pub fn num_orphans(&self) -> usize {
        self.orphans.as_ref().map(|o| o.lock().len()).unwrap_or(0)
    }

    /// Number of seal attempts currently registered for cancellation.
    pub fn active_authoring_attempts(&self) -> usize {
        self.authoring_tokens.lock().len()
    }

    /// Hands an extrinsic to the pool.  Returns `false` if it wasn't taken.
    pub fn submit_extrinsic(&self, ext: Extrinsic) -> bool {
        let id = ext.compute_id();
        match self.pool.admit(ext) {
            Ok(()) => {
                trace!(ext = %id, "admitted extrinsic");
                true
            }
            Err(e) => {
                warn!(ext = %id, err = %e, "rejected extrinsic");
                false
            }
        }
    }

    /// Decodes a block from its wire encoding and imports it.
    pub fn import_encoded(&self, buf: &[u8]) -> Result<ImportResult, Error> {
        match Block::decode(buf) {
            Ok(block) => self.import_block(block),
            Err(e) => {
                warn!(stage = %ImportStage::Received, err = %e, "failed to decode block");
                Ok(ImportResult::Rejected(ImportError::MalformedBlock(
                    e.to_string(),
                )))
            }
        }
    }

    /// Imports a block, and then any orphans that were waiting on it.
    pub fn import_block(&self, block: Block) -> Result<ImportResult, Error> {
        let block = Arc::new(block);
        let blkid = block.get_blockid();
        let res = self.import_one(block)?;

        if res.is_accepted() {
            self.release_orphans(blkid)?;
        }

        Ok(res)
    }

    fn release_orphans(&self, parent: BlockId) -> Result<(), Error> {
        let Some(orphans) = &self.orphans else {
            return Ok(());
        };

        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            let children = orphans.lock().take_children(&parent);
            for child in children {
                let child_id = child.get_blockid();
                debug!(blkid = %child_id, %parent, "releasing orphan");
                let res = self.import_one(child)?;
                if res.is_accepted() {
                    queue.push(child_id);
                }
            }
        }

        Ok(())
    }

    fn import_one(&self, block: Arc<Block>) -> Result<ImportResult, Error> {
        let blkid = block.get_blockid();
        let height = block.height();

        // Received.
        if self.is_seen_block(&blkid) {
            trace!(%blkid, "already have block");
            return Ok(ImportResult::Ignored(IgnoreReason::AlreadyKnown));
        }

        if self.invalid_blocks.lock().contains(&blkid) {
            debug!(%blkid, "block previously found invalid");
            return Ok(ImportResult::Rejected(ImportError::KnownInvalid));
        }

        if let Err(e) = import::check_block_shape(&block, &self.params) {
            return Ok(self.reject(blkid, e));
        }

        // Deciding what to do about a missing parent happens under the same
        // lock that stores and attaches blocks, so a parent that's in the
        // store but not the tree really was pruned.
        let parent_tip = {
            let fcm = self.fcm.lock();
            match fcm.get_tip(block.parent()) {
                Some(tip) => tip.clone(),
                None => return self.handle_unknown_parent(&fcm, block),
            }
        };

        // ConsensusChecking and StateApplying, outside the lock.
        let tip = match import::validate_block(&self.engine, block, &parent_tip) {
            Ok(tip) => tip,
            Err(e) => return Ok(self.reject(blkid, e)),
        };

        // Accepted.
        debug!(%blkid, %height, stage = %ImportStage::Accepted, "block valid");
        let outcome = self.submit_tip(tip)?;
        debug!(
            %blkid,
            stage = %ImportStage::ForkChoiceSubmitted,
            changed_canonical = %outcome.changed_canonical(),
            "imported block"
        );

        Ok(match outcome {
            ForkChoiceOutcome::Ignored(
                reason @ (IgnoreReason::AlreadyKnown | IgnoreReason::Stale),
            ) => ImportResult::Ignored(reason),
            outcome => ImportResult::Accepted(outcome),
        })
    }

    /// Called with the fork choice lock held.
    fn handle_unknown_parent(
        &self,
        fcm: &ForkChoiceManager,
        block: Arc<Block>,
    ) -> Result<ImportResult, Error> {
        let blkid = block.get_blockid();
        let parent = *block.parent();

        // If we have it stored but not in the tree it's been finalized over
        // or pruned.
        if block.height() <= fcm.finalized_height() + 1 || self.store.get_block(&parent)?.is_some()
        {
            debug!(%blkid, %parent, "block builds on stale parent");
            return Ok(ImportResult::Ignored(IgnoreReason::Stale));
        }

        if let Some(orphans) = &self.orphans {
            let mut orphans = orphans.lock();
            if orphans.insert(block) || orphans.contains(&blkid) {
                debug!(%blkid, %parent, "holding orphan block");
                return Ok(ImportResult::PendingParent);
            }
        }

        debug!(%blkid, %parent, "dropping block with unknown parent");
        Ok(ImportResult::Rejected(ImportError::UnknownParent(parent)))
    }

    fn reject(&self, blkid: BlockId, err: ImportError) -> ImportResult {
        warn!(
            %blkid,
            stage = %ImportStage::Rejected,
            failed_at = %err.stage(),
            %err,
            "rejected block"
        );
        if err.is_block_invalid() {
            self.invalid_blocks.lock().put(blkid, ());
        }
        ImportResult::Rejected(err)
    }

    /// Stores a validated tip, hands it to fork choice and commits the
    /// decision.
    fn submit_tip(&self, tip: ChainTip) -> Result<ForkChoiceOutcome, Error> {
        let (outcome, update) = {
            let mut fcm = self.fcm.lock();
            self.store
                .put_block_and_state(tip.block().clone(), tip.state().clone())?;
            self.submit_tip_locked(&mut fcm, tip)?
        };

        self.update_pool(update);
        Ok(outcome)
    }

    /// Runs fork choice and writes out the new pointers.  The canonical
    /// pointer is rolled back if we can't store it.  Once that's stored the
    /// decision stands, a finalized pointer we fail to write is retried on
    /// the next decision.
    fn submit_tip_locked(
        &self,
        fcm: &mut ForkChoiceManager,
        tip: ChainTip,
    ) -> Result<(ForkChoiceOutcome, PoolUpdate), Error> {
        let block = tip.block().clone();
        let prev = *fcm.cur_best_block();

        let outcome = fcm.consider(tip)?;
        let update = match &outcome {
            ForkChoiceOutcome::ExtendedCanonical => Some(PoolUpdate {
                retract: Vec::new(),
                apply: vec![block],
            }),
            ForkChoiceOutcome::NewBetterTip { retract, apply } => Some(PoolUpdate {
                retract: retract.clone(),
                apply: apply.clone(),
            }),
            ForkChoiceOutcome::Ignored(_) => None,
        };
        let Some(update) = update else {
            return Ok((outcome, PoolUpdate::default()));
        };

        let new_tip = *fcm.cur_best_block();
        if let Err(e) = self.store.set_canonical(&new_tip) {
            error!(%new_tip, %prev, err = %e, "failed to store canonical tip");
            fcm.rollback_canonical(prev)?;
            return Err(Error::Db(e));
        }

        self.cancel_authoring();

        let finalize_res = fcm.maybe_finalize();
        self.status_tx.send_replace(make_status(fcm));
        match finalize_res {
            Ok(_) => {
                if let Err(e) = self.store_finalized(fcm.finalized_tip()) {
                    error!(finalized = %fcm.finalized_tip(), err = %e, "failed to store finalized tip");
                }
            }
            Err(e) => error!(%new_tip, err = %e, "failed to finalize"),
        }

        Ok((outcome, update))
    }

    /// Writes out the finalized pointer if it moved since we last managed to.
    fn store_finalized(&self, fin: &BlockId) -> Result<(), DbError> {
        let mut stored = self.stored_finalized.lock();
        if *stored != *fin {
            self.store.set_finalized(fin)?;
            *stored = *fin;
        }
        Ok(())
    }

    /// Drops extrinsics that are now canonical from the pool and puts back
    /// ones that only were in retracted blocks.
    fn update_pool(&self, update: PoolUpdate) {
        if update.apply.is_empty() {
            return;
        }

        let applied: Vec<ExtrinsicId> = update
            .apply
            .iter()
            .flat_map(|b| b.extrinsics().iter().map(|e| e.compute_id()))
            .collect();
        let applied_set: HashSet<ExtrinsicId> = applied.iter().copied().collect();

        // Retract is tip first, put them back oldest first.
        let readmit: Vec<Extrinsic> = update
            .retract
            .iter()
            .rev()
            .flat_map(|b| b.extrinsics().iter())
            .filter(|e| !applied_set.contains(&e.compute_id()))
            .cloned()
            .collect();

        self.pool.prune(&applied);
        if !readmit.is_empty() {
            let n = readmit.len();
            let taken = self.pool.re_admit(readmit);
            debug!(%n, %taken, "re-admitted retracted extrinsics");
        }
    }

    fn register_authoring(&self, token: CancelToken) {
        self.authoring_tokens.lock().push(token);
    }

    fn unregister_authoring(&self, token: &CancelToken) {
        self.authoring_tokens.lock().retain(|t| !t.same_as(token));
    }

    /// Cancels every seal attempt in progress, their parent is stale now.
    fn cancel_authoring(&self) {
        let tokens = std::mem::take(&mut *self.authoring_tokens.lock());
        if !tokens.is_empty() {
            debug!(n = %tokens.len(), "cancelling authoring attempts");
        }
        for t in tokens {
            t.cancel();
        }
    }

    /// Builds, seals and submits a block on top of the canonical tip.  If the
    /// canonical tip moves while we're sealing we start over on the new one.
    pub fn author_block(&self, config: &AuthoringConfig) -> Result<AuthoredBlock, AuthoringError> {
        let mut excluded_all = Vec::new();

        for attempt in 1..=config.max_attempts {
            let parent = self
                .canonical_chain_tip()
                .ok_or_else(|| Error::MissingBlock(self.canonical_tip()))?;
            let parent_id = parent.blkid();

            let pulled = self.pool.pull(config.max_extrinsics);
            let (cand, excluded) = block_assembly::prepare_candidate(&parent, pulled);
            excluded_all.extend(excluded.into_iter().map(|(e, err)| (e.compute_id(), err)));

            if cand.is_empty() && !config.allow_empty_blocks {
                debug!("nothing to put in block");
                return Err(AuthoringError::NothingToAuthor);
            }

            let token = CancelToken::new();
            self.register_authoring(token.clone());
            debug!(%attempt, parent = %parent_id, n = %cand.extrinsics().len(), "sealing block");

            let ctx = config.seal_context(token.clone());
            let tip = match block_assembly::seal_candidate(&self.engine, cand, &parent, &ctx) {
                Ok(tip) => tip,
                Err((e, cand)) => {
                    self.unregister_authoring(&token);
                    self.pool.re_admit(cand.into_extrinsics());
                    if e == ConsensusError::SealCancelled {
                        debug!(%attempt, "seal cancelled, restarting");
                        continue;
                    }
                    warn!(%attempt, err = %e, "failed to seal block");
                    return Err(e.into());
                }
            };

            let blkid = tip.blkid();
            let block = tip.block().clone();

            let mut fcm = self.fcm.lock();
            self.unregister_authoring(&token);
            if token.is_cancelled() || *fcm.cur_best_block() != parent_id {
                drop(fcm);
                debug!(%attempt, %blkid, "parent moved while sealing, restarting");
                self.pool.re_admit(block.extrinsics().to_vec());
                continue;
            }

            if let Err(e) = self
                .store
                .put_block_and_state(block.clone(), tip.state().clone())
            {
                drop(fcm);
                self.pool.re_admit(block.extrinsics().to_vec());
                return Err(Error::Db(e).into());
            }

            let res = self.submit_tip_locked(&mut fcm, tip);
            drop(fcm);

            let (outcome, update) = match res {
                Ok(r) => r,
                Err(e) => {
                    self.pool.re_admit(block.extrinsics().to_vec());
                    return Err(e.into());
                }
            };
            self.update_pool(update);

            info!(%blkid, height = %block.height(), n = %block.extrinsics().len(), "authored block");
            if let Err(e) = self.release_orphans(blkid) {
                warn!(%blkid, err = %e, "failed to release orphans after authoring");
            }

            return Ok(AuthoredBlock {
                block,
                outcome,
                excluded: excluded_all,
            });
        }

        Err(AuthoringError::TooManyAttempts(config.max_attempts))
    }

    /// Cancels authoring and makes sure the canonical pointer is stored.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.cancel_authoring();
        let fcm = self.fcm.lock();
        let tip = *fcm.cur_best_block();
        self.store.set_canonical(&tip)?;
        self.store_finalized(fcm.finalized_tip())?;
        self.store.flush()?;
        info!(%tip, "chain manager shut down");
        Ok(())
    }
}

/// Blocks that left and joined the canonical chain in one decision.
#[derive(Default)]
struct PoolUpdate {
    retract: Vec<Arc<Block>>,
    apply: Vec<Arc<Block>>,
}

/// Sets up the chain manager from whatever is in the store, writing genesis
/// first if the store is empty.
pub fn init_chain_manager<S: BlockStore, P: TransactionPool>(
    params: Arc<Params>,
    store: S,
    pool: P,
    genesis_state: State,
) -> anyhow::Result<ChainManager<S, P>> {
    let fin_tip = match store.get_finalized_tip()? {
        Some(blkid) => load_tip(&store, blkid)?,
        None => genesis::init_genesis_states(&params, genesis_state, &store)?,
    };
    let fin_blkid = fin_tip.blkid();
    let fin_height = fin_tip.height();

    let engine = ConsensusEngine::from_seal_rule(&params.consensus().seal_rule);
    let mut tree = ChainTree::new_empty(fin_tip, 0);

    // Everything stored above the finalized block was validated before it
    // was written, just hook it back up.  Blocks on pruned branches have no
    // parent in the tree and get skipped.
    let mut height = fin_height + 1;
    loop {
        let ids = store.get_blocks_at_height(height)?;
        if ids.is_empty() {
            break;
        }

        for blkid in ids {
            let tip = load_tip(&store, blkid)?;
            if !tree.is_seen_block(tip.parent()) {
                continue;
            }

            let weight = engine.block_weight(tip.header())?;
            let tip = ChainTip::new(tip.block().clone(), tip.state().clone(), weight);
            tree.attach_block(tip)?;
        }

        height += 1;
    }

    let fcm = ForkChoiceManager::new(params.clone(), tree);
    let best = *fcm.cur_best_block();

    let stored = store.get_canonical_tip()?;
    if stored != Some(best) {
        warn!(?stored, %best, "stored canonical tip out of date, repairing");
        store.set_canonical(&best)?;
    }

    info!(
        finalized = %fin_blkid,
        tip = %best,
        height = %fcm.cur_height(),
        blocks = %fcm.chain_tree().num_blocks(),
        "initialized chain manager"
    );

    Ok(ChainManager::new(params, store, pool, fcm))
}

fn load_tip<S: BlockStore>(store: &S, blkid: BlockId) -> Result<ChainTip, Error> {
    let block = store.get_block(&blkid)?.ok_or(Error::MissingBlock(blkid))?;
    let state = store
        .get_state(&blkid)?
        .ok_or(Error::MissingBlockState(blkid))?;
    Ok(ChainTip::new(block, state, 0))
}
