//! Building and sealing blocks on top of the canonical tip.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tessera_chaintsn::{errors::ExtrinsicError, transition};
use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tracing::*;

use crate::{
    engine::{CancelToken, ConsensusEngine, SealContext, SealEngine},
    errors::ConsensusError,
    fork_choice_manager::ForkChoiceOutcome,
};

/// Settings for producing blocks locally.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthoringConfig {
    /// Max extrinsics to pull from the pool per block.
    #[serde(default = "default_max_extrinsics")]
    pub max_extrinsics: usize,

    /// How long a single seal attempt may run, 0 for no limit.
    #[serde(default = "default_seal_timeout_ms")]
    pub seal_timeout_ms: u64,

    /// How many times we restart after the parent moves under us.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Difficulty to seal work blocks at, defaults to the minimum.
    #[serde(default)]
    pub work_difficulty: Option<u64>,

    #[serde(default = "default_allow_empty_blocks")]
    pub allow_empty_blocks: bool,

    /// Secret key for authority sealing.
    #[serde(default)]
    pub authoring_key: Option<Buf32>,
}

fn default_max_extrinsics() -> usize {
    100
}

fn default_seal_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_allow_empty_blocks() -> bool {
    true
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            max_extrinsics: default_max_extrinsics(),
            seal_timeout_ms: default_seal_timeout_ms(),
            max_attempts: default_max_attempts(),
            work_difficulty: None,
            allow_empty_blocks: default_allow_empty_blocks(),
            authoring_key: None,
        }
    }
}

impl AuthoringConfig {
    /// Builds the context for one seal attempt.
    pub(crate) fn seal_context(&self, cancel: CancelToken) -> SealContext {
        let deadline = (self.seal_timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(self.seal_timeout_ms));
        SealContext {
            cancel,
            deadline,
            authoring_key: self.authoring_key,
            work_difficulty: self.work_difficulty,
            nonce_start: 0,
        }
    }
}

/// A block we authored and what fork choice made of it.
#[derive(Debug)]
pub struct AuthoredBlock {
    pub block: Arc<Block>,
    pub outcome: ForkChoiceOutcome,

    /// Extrinsics we pulled but couldn't include, these were dropped.
    pub excluded: Vec<(ExtrinsicId, ExtrinsicError)>,
}

/// Unsealed block built on some parent.
#[derive(Clone, Debug)]
pub struct BlockCandidate {
    template: HeaderTemplate,
    extrinsics: Vec<Extrinsic>,
    state: State,
}

impl BlockCandidate {
    pub fn template(&self) -> &HeaderTemplate {
        &self.template
    }

    pub fn extrinsics(&self) -> &[Extrinsic] {
        &self.extrinsics
    }

    pub fn is_empty(&self) -> bool {
        self.extrinsics.is_empty()
    }

    /// Gives back the extrinsics, if we end up not using the candidate.
    pub fn into_extrinsics(self) -> Vec<Extrinsic> {
        self.extrinsics
    }
}

/// Executes candidate extrinsics on the parent state, leaving out any that
/// fail, and builds the header template for the rest.
pub fn prepare_candidate(
    parent: &ChainTip,
    candidates: Vec<Extrinsic>,
) -> (BlockCandidate, Vec<(Extrinsic, ExtrinsicError)>) {
    let sel = transition::select_applicable(parent.state(), candidates);
    for (ext, err) in &sel.excluded {
        debug!(ext = %ext.compute_id(), %err, "excluding extrinsic from block");
    }

    let template = HeaderTemplate::new(
        parent.blkid(),
        parent.height() + 1,
        sel.output.state_digest,
        sel.output.extrinsics_digest,
    );

    let cand = BlockCandidate {
        template,
        extrinsics: sel.included,
        state: sel.output.state,
    };
    (cand, sel.excluded)
}

/// Seals a candidate, producing the tip to submit to fork choice.  On error
/// the candidate is handed back so its extrinsics can be returned to the
/// pool.
pub fn seal_candidate(
    engine: &ConsensusEngine,
    cand: BlockCandidate,
    parent: &ChainTip,
    ctx: &SealContext,
) -> Result<ChainTip, (ConsensusError, BlockCandidate)> {
    let state_digest = *cand.template.state_digest();
    let seal = match engine.seal(&cand.template, parent.header(), &state_digest, ctx) {
        Ok(seal) => seal,
        Err(e) => return Err((e, cand)),
    };

    let header = cand.template.clone().complete_with(seal);
    let weight = match engine.block_weight(&header) {
        Ok(w) => w,
        Err(e) => return Err((e, cand)),
    };

    let block = Block::new(header, cand.extrinsics);
    Ok(ChainTip::new(Arc::new(block), Arc::new(cand.state), weight))
}

#[cfg(test)]
mod tests {
    use tessera_primitives::params::SealRule;
    use tessera_state::extrinsic::Call;

    use super::*;
    use crate::import::validate_block;

    fn genesis() -> ChainTip {
        let tmplt = HeaderTemplate::new(BlockId::null(), 0, Buf32::zero(), Buf32::zero());
        let block = Block::new(tmplt.complete_with(Seal::new(EngineTag::Work, vec![])), vec![]);
        ChainTip::new(Arc::new(block), Arc::new(State::new()), 0)
    }

    #[test]
    fn test_prepare_and_seal() {
        let engine = ConsensusEngine::from_seal_rule(&SealRule::WorkThreshold { min_difficulty: 4 });
        let g = genesis();

        let good = Extrinsic::from_call(
            &Call::Set {
                key: b"x".to_vec(),
                value: vec![1],
            },
            0,
        );
        let bad = Extrinsic::from_call(&Call::Remove { key: b"y".to_vec() }, 0);

        let (cand, excluded) = prepare_candidate(&g, vec![bad.clone(), good.clone()]);
        assert_eq!(cand.extrinsics(), &[good]);
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].0, bad);
        assert_eq!(excluded[0].1, ExtrinsicError::MissingKey);

        let ctx = AuthoringConfig::default().seal_context(CancelToken::new());
        let tip = seal_candidate(&engine, cand, &g, &ctx).unwrap();

        // What we authored is something we'd import.
        let imported = validate_block(&engine, tip.block().clone(), &g).unwrap();
        assert_eq!(imported.state().digest(), tip.state().digest());
        assert_eq!(imported.block_weight(), 4);
    }

    #[test]
    fn test_seal_failure_returns_candidate() {
        let engine = ConsensusEngine::from_seal_rule(&SealRule::Authority {
            authorities: vec![Buf32::from([2; 32])],
            round_robin: false,
        });
        let g = genesis();
        let ext = Extrinsic::from_call(
            &Call::Mint {
                account: Buf32::from([1; 32]),
                amount: 5,
            },
            0,
        );

        let (cand, _) = prepare_candidate(&g, vec![ext.clone()]);
        let ctx = AuthoringConfig::default().seal_context(CancelToken::new());
        let (err, cand) = seal_candidate(&engine, cand, &g, &ctx).unwrap_err();
        assert_eq!(err, ConsensusError::MissingAuthoringKey);
        assert_eq!(cand.into_extrinsics(), vec![ext]);
    }

    #[test]
    fn test_config_defaults() {
        let cfg: AuthoringConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, AuthoringConfig::default());
        assert!(cfg.seal_context(CancelToken::new()).deadline.is_some());

        let cfg = AuthoringConfig {
            seal_timeout_ms: 0,
            ..Default::default()
        };
        assert!(cfg.seal_context(CancelToken::new()).deadline.is_none());
    }
}
