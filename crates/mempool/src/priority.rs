use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tracing::*;

use crate::{PoolError, PoolResult, TransactionPool};

/// Limits for the priority pool.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Max number of extrinsics held at once.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Anything with a lower priority is refused.
    #[serde(default)]
    pub min_priority: u64,

    /// Max payload size of a single extrinsic.
    #[serde(default = "default_max_extrinsic_size")]
    pub max_extrinsic_size: usize,
}

fn default_capacity() -> usize {
    4096
}

fn default_max_extrinsic_size() -> usize {
    64 * 1024
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            min_priority: 0,
            max_extrinsic_size: default_max_extrinsic_size(),
        }
    }
}

/// Highest priority first, then oldest first.  Re-admitted extrinsics get
/// negative sequence numbers so they go ahead of anything submitted fresh at
/// the same priority.
type OrderingKey = (Reverse<u64>, i64);

#[derive(Default)]
struct PoolState {
    entries: HashMap<ExtrinsicId, (OrderingKey, Extrinsic)>,
    ordering: BTreeMap<OrderingKey, ExtrinsicId>,
    next_seq: i64,
    next_readmit_seq: i64,
}

impl PoolState {
    fn check(&self, config: &PoolConfig, id: &ExtrinsicId, ext: &Extrinsic) -> PoolResult<()> {
        if self.entries.contains_key(id) {
            return Err(PoolError::AlreadyKnown(*id));
        }

        if ext.priority() < config.min_priority {
            return Err(PoolError::PriorityTooLow {
                priority: ext.priority(),
                minimum: config.min_priority,
            });
        }

        if ext.encoded_size() > config.max_extrinsic_size {
            return Err(PoolError::TooLarge {
                size: ext.encoded_size(),
                limit: config.max_extrinsic_size,
            });
        }

        if self.entries.len() >= config.capacity {
            return Err(PoolError::PoolFull {
                current: self.entries.len(),
                limit: config.capacity,
            });
        }

        Ok(())
    }

    fn insert(&mut self, id: ExtrinsicId, key: OrderingKey, ext: Extrinsic) {
        self.ordering.insert(key, id);
        self.entries.insert(id, (key, ext));
    }

    fn remove(&mut self, id: &ExtrinsicId) -> Option<Extrinsic> {
        let (key, ext) = self.entries.remove(id)?;
        self.ordering.remove(&key);
        Some(ext)
    }
}

/// Pool that hands out extrinsics highest priority first, FIFO among equal
/// priorities.
pub struct PriorityPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PriorityPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                next_readmit_seq: -1,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the ids in the order they'd be pulled, without pulling them.
    pub fn pending_ids(&self) -> Vec<ExtrinsicId> {
        self.state.lock().ordering.values().copied().collect()
    }
}

impl TransactionPool for PriorityPool {
    fn pull(&self, max: usize) -> Vec<Extrinsic> {
        let mut state = self.state.lock();
        let ids: Vec<ExtrinsicId> = state.ordering.values().take(max).copied().collect();
        ids.iter().filter_map(|id| state.remove(id)).collect()
    }

    fn admit(&self, ext: Extrinsic) -> PoolResult<()> {
        let id = ext.compute_id();
        let mut state = self.state.lock();
        state.check(&self.config, &id, &ext)?;

        let key = (Reverse(ext.priority()), state.next_seq);
        state.next_seq += 1;
        state.insert(id, key, ext);
        trace!(%id, "admitted extrinsic");
        Ok(())
    }

    fn re_admit(&self, exts: Vec<Extrinsic>) -> usize {
        let mut state = self.state.lock();
        let mut readmitted = 0;

        // Walk backwards so the earliest one gets the lowest sequence number.
        for ext in exts.into_iter().rev() {
            let id = ext.compute_id();
            match state.check(&self.config, &id, &ext) {
                Ok(()) => {
                    let key = (Reverse(ext.priority()), state.next_readmit_seq);
                    state.next_readmit_seq -= 1;
                    state.insert(id, key, ext);
                    readmitted += 1;
                }
                Err(PoolError::AlreadyKnown(_)) => {}
                Err(e) => warn!(%id, err = %e, "failed to re-admit extrinsic"),
            }
        }

        readmitted
    }

    fn prune(&self, ids: &[ExtrinsicId]) {
        let mut state = self.state.lock();
        for id in ids {
            state.remove(id);
        }
    }

    fn contains(&self, id: &ExtrinsicId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
