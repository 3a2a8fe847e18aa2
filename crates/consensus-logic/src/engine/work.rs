//! Proof of work over SHA-256.
//!
//! The seal hash is `H(commitment || difficulty || nonce)` with big endian
//! integers.  Its high 128 bits, read as a big endian number, must be at most
//! `u128::MAX / difficulty`, so a difficulty of `d` takes about `d` hashes to
//! meet.  The difficulty is chosen by the sealer, must be at least the
//! configured minimum, and is the weight the block adds to its chain.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::{hash, prelude::*};
use tessera_state::prelude::*;
use tracing::*;

use super::{check_candidate, check_common, decode_proof, SealContext, SealEngine};
use crate::errors::ConsensusError;

/// Number of nonces tried between checks of the cancel token and deadline.
pub const CANCEL_POLL_INTERVAL: u64 = 4096;

#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct WorkProof {
    pub difficulty: u64,
    pub nonce: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct WorkEngine {
    min_difficulty: u64,
}

impl WorkEngine {
    pub fn new(min_difficulty: u64) -> Self {
        Self {
            min_difficulty: min_difficulty.max(1),
        }
    }

    pub fn min_difficulty(&self) -> u64 {
        self.min_difficulty
    }

    fn check_difficulty(&self, difficulty: u64) -> Result<(), ConsensusError> {
        if difficulty < self.min_difficulty {
            return Err(ConsensusError::InsufficientDifficulty(
                difficulty,
                self.min_difficulty,
            ));
        }
        Ok(())
    }
}

fn compute_seal_hash(commitment: &Buf32, difficulty: u64, nonce: u64) -> Buf32 {
    hash::concat(&[
        commitment.as_slice(),
        &difficulty.to_be_bytes(),
        &nonce.to_be_bytes(),
    ])
}

fn meets_threshold(seal_hash: &Buf32, difficulty: u64) -> bool {
    let mut high = [0; 16];
    high.copy_from_slice(&seal_hash.as_slice()[..16]);
    u128::from_be_bytes(high) <= u128::MAX / difficulty as u128
}

impl SealEngine for WorkEngine {
    fn tag(&self) -> EngineTag {
        EngineTag::Work
    }

    fn validate_seal(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
    ) -> Result<(), ConsensusError> {
        check_common(self.tag(), header, parent)?;

        let proof: WorkProof = decode_proof(header.seal())?;
        self.check_difficulty(proof.difficulty)?;

        let commitment = header.seal_commitment(self.tag(), resulting_state_digest);
        let seal_hash = compute_seal_hash(&commitment, proof.difficulty, proof.nonce);
        if !meets_threshold(&seal_hash, proof.difficulty) {
            return Err(ConsensusError::ThresholdNotMet(proof.difficulty));
        }

        Ok(())
    }

    fn seal(
        &self,
        candidate: &HeaderTemplate,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
        ctx: &SealContext,
    ) -> Result<Seal, ConsensusError> {
        check_candidate(candidate, parent)?;

        let difficulty = ctx
            .work_difficulty
            .unwrap_or(self.min_difficulty)
            .max(self.min_difficulty);
        let commitment = candidate.seal_commitment(self.tag(), resulting_state_digest);

        let mut nonce = ctx.nonce_start;
        let mut tried = 0u64;
        loop {
            if tried % CANCEL_POLL_INTERVAL == 0 {
                ctx.check_interrupt()?;
            }

            let seal_hash = compute_seal_hash(&commitment, difficulty, nonce);
            if meets_threshold(&seal_hash, difficulty) {
                trace!(%nonce, %difficulty, %tried, "found seal");
                let proof = borsh::to_vec(&WorkProof { difficulty, nonce })
                    .expect("work: enc proof");
                return Ok(Seal::new(self.tag(), proof));
            }

            tried += 1;
            if tried == u64::MAX {
                return Err(ConsensusError::NoncesExhausted);
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    fn block_weight(&self, header: &BlockHeader) -> Result<u128, ConsensusError> {
        let proof: WorkProof = decode_proof(header.seal())?;
        Ok(proof.difficulty as u128)
    }
}
