//! Fork choice manager.  Tracks every validated block above the finalized
//! root and picks the canonical tip from them.

use std::{cmp::Reverse, sync::Arc};

use tessera_primitives::{params::Params, prelude::*};
use tessera_state::prelude::*;
use tracing::*;

use crate::{
    chain_tree::{ChainTree, FinalizeReport},
    errors::*,
    reorg,
};

/// Why fork choice didn't do anything with a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    /// We already have the block in the tree.
    AlreadyKnown,

    /// Attached, but it doesn't beat the canonical tip.
    NotBetter,

    /// Builds on a block that's below the finalized root or was pruned.
    Stale,
}

/// What fork choice decided to do with a new tip.
#[derive(Clone, Debug)]
pub enum ForkChoiceOutcome {
    /// The block sits directly on the canonical tip and became the new tip.
    ExtendedCanonical,

    /// Canonical switched to a different branch.
    NewBetterTip {
        /// Blocks leaving the canonical chain, tip first.
        retract: Vec<Arc<Block>>,

        /// Blocks joining the canonical chain, in application order.
        apply: Vec<Arc<Block>>,
    },

    Ignored(IgnoreReason),
}

impl ForkChoiceOutcome {
    /// Returns if the canonical tip moved.
    pub fn changed_canonical(&self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// Key blocks are ordered by for fork choice, higher is better.
fn tip_order_key(id: &BlockId, cumulative_weight: u128) -> (u128, Reverse<BlockId>) {
    (cumulative_weight, Reverse(*id))
}

/// Tracks the parts of the chain that haven't been finalized yet.
pub struct ForkChoiceManager {
    /// Consensus parameters.
    params: Arc<Params>,

    /// Tracks unfinalized block tips.
    chain_tree: ChainTree,

    /// Current best block.
    cur_best_block: BlockId,

    /// Current best block height.
    cur_height: u64,
}

impl ForkChoiceManager {
    /// Constructs a new instance with the canonical tip at the best tip of the
    /// tree.
    pub fn new(params: Arc<Params>, chain_tree: ChainTree) -> Self {
        let mut fcm = Self {
            params,
            cur_best_block: *chain_tree.finalized_tip(),
            cur_height: chain_tree.finalized_height(),
            chain_tree,
        };

        if let Some(best) = fcm.best_tip() {
            fcm.set_cur_best(best);
        }

        fcm
    }

    pub fn chain_tree(&self) -> &ChainTree {
        &self.chain_tree
    }

    pub fn cur_best_block(&self) -> &BlockId {
        &self.cur_best_block
    }

    pub fn cur_height(&self) -> u64 {
        self.cur_height
    }

    pub fn cur_tip(&self) -> Option<&ChainTip> {
        self.chain_tree.get_tip(&self.cur_best_block)
    }

    pub fn cur_cumulative_weight(&self) -> u128 {
        self.chain_tree
            .get_entry(&self.cur_best_block)
            .map(|e| e.cumulative_weight())
            .unwrap_or_default()
    }

    pub fn finalized_tip(&self) -> &BlockId {
        self.chain_tree.finalized_tip()
    }

    pub fn finalized_height(&self) -> u64 {
        self.chain_tree.finalized_height()
    }

    pub fn is_seen_block(&self, id: &BlockId) -> bool {
        self.chain_tree.is_seen_block(id)
    }

    pub fn get_tip(&self, id: &BlockId) -> Option<&ChainTip> {
        self.chain_tree.get_tip(id)
    }

    /// Picks the best of all the chain tips.  This only depends on what's in
    /// the tree, not the order things were added.
    pub fn best_tip(&self) -> Option<BlockId> {
        self.chain_tree
            .chain_tips_iter()
            .filter_map(|id| {
                let ent = self.chain_tree.get_entry(id)?;
                Some((tip_order_key(id, ent.cumulative_weight()), *id))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, id)| id)
    }

    fn set_cur_best(&mut self, id: BlockId) {
        self.cur_height = self
            .chain_tree
            .get_entry(&id)
            .map(|e| e.height())
            .unwrap_or(self.cur_height);
        self.cur_best_block = id;
    }

    /// Adds a validated block to the tree and decides whether it becomes the
    /// canonical tip.
    pub fn consider(&mut self, tip: ChainTip) -> Result<ForkChoiceOutcome, Error> {
        let blkid = tip.blkid();
        if self.chain_tree.is_seen_block(&blkid) {
            return Ok(ForkChoiceOutcome::Ignored(IgnoreReason::AlreadyKnown));
        }

        if !self.chain_tree.is_seen_block(tip.parent()) {
            if tip.height() <= self.finalized_height() + 1 {
                debug!(%blkid, "block builds on pruned or finalized-over parent");
                return Ok(ForkChoiceOutcome::Ignored(IgnoreReason::Stale));
            }

            return Err(ChainTreeError::AttachMissingParent(blkid, *tip.parent()).into());
        }

        let height = tip.height();
        self.chain_tree.attach_block(tip)?;

        let Some(best) = self.best_tip() else {
            return Err(Error::MissingBlock(blkid));
        };

        if best == self.cur_best_block {
            trace!(%blkid, %height, "attached block not better than current tip");
            return Ok(ForkChoiceOutcome::Ignored(IgnoreReason::NotBetter));
        }

        let prev = self.cur_best_block;
        let reorg = reorg::compute_reorg(&prev, &best, &self.chain_tree)
            .ok_or(Error::UnableToFindReorg(prev, best))?;

        // The tree only spans unfinalized blocks so any depth is reachable,
        // we still switch but make noise about it.
        let warn_depth = self.params.run().max_reorg_depth;
        if reorg.depth() > warn_depth {
            warn!(
                old_tip = %prev,
                new_tip = %best,
                depth = %reorg.depth(),
                %warn_depth,
                "deep reorg"
            );
        }

        let up: Vec<BlockId> = reorg.apply_iter().copied().collect();
        let outcome = if reorg.revert_iter().next().is_none() && up == [blkid] {
            ForkChoiceOutcome::ExtendedCanonical
        } else {
            let retract = self.collect_blocks(reorg.revert_iter())?;
            let apply = self.collect_blocks(up.iter())?;
            info!(
                old_tip = %prev,
                new_tip = %best,
                pivot = %reorg.pivot(),
                retracted = %retract.len(),
                applied = %apply.len(),
                "reorg"
            );
            ForkChoiceOutcome::NewBetterTip { retract, apply }
        };

        self.set_cur_best(best);
        debug!(%best, height = %self.cur_height, "new canonical tip");
        Ok(outcome)
    }

    fn collect_blocks<'a>(
        &self,
        ids: impl Iterator<Item = &'a BlockId>,
    ) -> Result<Vec<Arc<Block>>, Error> {
        ids.map(|id| {
            self.chain_tree
                .get_entry(id)
                .map(|e| e.block().clone())
                .ok_or(Error::MissingBlock(*id))
        })
        .collect()
    }

    /// Puts the canonical pointer back where it was, used if we couldn't
    /// persist a decision.
    pub fn rollback_canonical(&mut self, prev: BlockId) -> Result<(), Error> {
        if !self.chain_tree.is_seen_block(&prev) {
            return Err(Error::MissingBlock(prev));
        }

        warn!(from = %self.cur_best_block, to = %prev, "rolling back canonical tip");
        self.set_cur_best(prev);
        Ok(())
    }

    /// Finalizes the canonical ancestor `finality_depth` blocks below the tip,
    /// if the tip is far enough above the current finalized block.  Competing
    /// branches below it get evicted.
    pub fn maybe_finalize(&mut self) -> Result<Option<FinalizeReport>, Error> {
        let depth = self.params.run().finality_depth;
        if self.cur_height <= self.finalized_height() + depth {
            return Ok(None);
        }

        let target_height = self.cur_height - depth;
        let target = self
            .chain_tree
            .ancestor_at_height(&self.cur_best_block, target_height)
            .ok_or(Error::MissingBlock(self.cur_best_block))?;

        let report = self.chain_tree.update_finalized_tip(&target)?;
        debug!(
            finalized = %target,
            height = %target_height,
            rejected = %report.rejected().len(),
            "finalized block"
        );
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use tessera_primitives::params::*;

    use super::*;
    use crate::chain_tree::test_support::*;

    fn params(finality_depth: u64) -> Arc<Params> {
        Arc::new(Params {
            consensus: ConsensusParams {
                seal_rule: SealRule::WorkThreshold { min_difficulty: 1 },
                max_block_extrinsics: 100,
                max_extrinsic_size: 1024,
            },
            run: RunParams {
                finality_depth,
                ..Default::default()
            },
        })
    }

    fn setup() -> (ForkChoiceManager, ChainTip) {
        let g = genesis_tip();
        let fcm = ForkChoiceManager::new(params(32), ChainTree::new_empty(g.clone(), 0));
        (fcm, g)
    }

    #[test]
    fn test_extend_and_known() {
        let (mut fcm, g) = setup();
        let b1 = child_tip(&g, 1, 5);

        let out = fcm.consider(b1.clone()).unwrap();
        assert!(matches!(out, ForkChoiceOutcome::ExtendedCanonical));
        assert_eq!(fcm.cur_best_block(), &b1.blkid());
        assert_eq!(fcm.cur_height(), 1);
        assert_eq!(fcm.cur_cumulative_weight(), 5);

        let out = fcm.consider(b1).unwrap();
        assert!(matches!(
            out,
            ForkChoiceOutcome::Ignored(IgnoreReason::AlreadyKnown)
        ));
    }

    #[test]
    fn test_heavier_branch_wins() {
        let (mut fcm, g) = setup();
        let b1 = child_tip(&g, 1, 1);
        fcm.consider(b1.clone()).unwrap();

        let b2a = child_tip(&b1, 0xa, 10);
        let b2b = child_tip(&b1, 0xb, 12);
        fcm.consider(b2a.clone()).unwrap();

        let out = fcm.consider(b2b.clone()).unwrap();
        let ForkChoiceOutcome::NewBetterTip { retract, apply } = out else {
            panic!("test: expected reorg, got {out:?}");
        };
        assert_eq!(retract.len(), 1);
        assert_eq!(retract[0].get_blockid(), b2a.blkid());
        assert_eq!(apply.len(), 1);
        assert_eq!(apply[0].get_blockid(), b2b.blkid());
        assert_eq!(fcm.cur_best_block(), &b2b.blkid());

        // Something lighter on the old branch doesn't move us, but is kept.
        let out = fcm.consider(child_tip(&b2a, 1, 1)).unwrap();
        assert!(matches!(out, ForkChoiceOutcome::Ignored(IgnoreReason::NotBetter)));
        assert_eq!(fcm.chain_tree().chain_tips_iter().count(), 2);
        assert_eq!(fcm.cur_best_block(), &b2b.blkid());
    }

    #[test]
    fn test_reorg_past_warn_depth() {
        let g = genesis_tip();
        let mut p = (*params(32)).clone();
        p.run.max_reorg_depth = 1;
        let mut fcm = ForkChoiceManager::new(Arc::new(p), ChainTree::new_empty(g.clone(), 0));

        let heavy = child_tip(&g, 1, 10);
        fcm.consider(heavy.clone()).unwrap();

        let mut prev = g.clone();
        for _ in 0..11 {
            let b = child_tip(&prev, 2, 1);
            fcm.consider(b.clone()).unwrap();
            prev = b;
        }
        assert_eq!(fcm.cur_best_block(), &prev.blkid());
        assert_eq!(fcm.cur_cumulative_weight(), 11);

        let out = fcm.consider(child_tip(&heavy, 1, 5)).unwrap();
        let ForkChoiceOutcome::NewBetterTip { retract, apply } = out else {
            panic!("test: expected reorg, got {out:?}");
        };
        assert_eq!(retract.len(), 11);
        assert_eq!(apply.len(), 2);
    }

    #[test]
    fn test_tie_lowest_id_wins() {
        let (mut fcm, g) = setup();
        let x = child_tip(&g, 1, 3);
        let y = child_tip(&g, 2, 3);
        let lower = x.blkid().min(y.blkid());

        fcm.consider(x.clone()).unwrap();
        fcm.consider(y.clone()).unwrap();
        assert_eq!(fcm.cur_best_block(), &lower);

        // Same answer in the other order.
        let (mut fcm2, _) = setup();
        fcm2.consider(y).unwrap();
        fcm2.consider(x).unwrap();
        assert_eq!(fcm2.cur_best_block(), &lower);
    }

    #[test]
    fn test_missing_parent() {
        let (mut fcm, g) = setup();
        let b1 = child_tip(&g, 1, 1);
        let b2 = child_tip(&b1, 1, 1);
        assert!(matches!(
            fcm.consider(b2),
            Err(Error::ChainTree(ChainTreeError::AttachMissingParent(..)))
        ));
        assert_eq!(fcm.cur_best_block(), &g.blkid());
    }

    #[test]
    fn test_rollback() {
        let (mut fcm, g) = setup();
        let b1 = child_tip(&g, 1, 1);
        fcm.consider(b1.clone()).unwrap();
        let b2 = child_tip(&b1, 1, 1);
        fcm.consider(b2).unwrap();

        fcm.rollback_canonical(b1.blkid()).unwrap();
        assert_eq!(fcm.cur_best_block(), &b1.blkid());
        assert_eq!(fcm.cur_height(), 1);
        assert!(fcm.rollback_canonical(BlockId::from([1; 32])).is_err());
    }

    #[test]
    fn test_finalize_prunes_competitors() {
        let g = genesis_tip();
        let mut fcm = ForkChoiceManager::new(params(2), ChainTree::new_empty(g.clone(), 0));

        let side = child_tip(&g, 9, 1);
        fcm.consider(side.clone()).unwrap();

        let mut prev = g.clone();
        let mut main = Vec::new();
        for _ in 0..4 {
            let b = child_tip(&prev, 1, 2);
            fcm.consider(b.clone()).unwrap();
            main.push(b.clone());
            prev = b;
        }
        assert_eq!(fcm.cur_best_block(), &main[3].blkid());

        let report = fcm.maybe_finalize().unwrap().expect("test: nothing finalized");
        assert_eq!(report.new_tip(), &main[1].blkid());
        assert_eq!(report.rejected(), &[side.blkid()]);
        assert_eq!(fcm.finalized_height(), 2);
        assert!(!fcm.is_seen_block(&side.blkid()));

        // Not deep enough for more.
        assert!(fcm.maybe_finalize().unwrap().is_none());

        // Blocks on the pruned branch are stale now.
        let out = fcm.consider(child_tip(&side, 1, 100)).unwrap();
        assert!(matches!(out, ForkChoiceOutcome::Ignored(IgnoreReason::Stale)));
    }
}
