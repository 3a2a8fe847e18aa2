//! Blocks sealed by a signature from one of a fixed set of authorities.

use borsh::{BorshDeserialize, BorshSerialize};
use secp256k1::{schnorr::Signature, Keypair, Message, SecretKey, XOnlyPublicKey, SECP256K1};
use tessera_primitives::prelude::*;
use tessera_state::prelude::*;

use super::{check_candidate, check_common, decode_proof, SealContext, SealEngine};
use crate::errors::ConsensusError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct AuthorityProof {
    /// Index into the authority list.
    pub authority: u32,
    pub signature: Buf64,
}

#[derive(Clone, Debug)]
pub struct AuthorityEngine {
    /// BIP340 x-only pubkeys.
    authorities: Vec<Buf32>,

    /// If only one authority is allowed to seal each height.
    round_robin: bool,
}

impl AuthorityEngine {
    pub fn new(authorities: Vec<Buf32>, round_robin: bool) -> Self {
        Self {
            authorities,
            round_robin,
        }
    }

    pub fn authorities(&self) -> &[Buf32] {
        &self.authorities
    }

    /// Authority whose turn it is at a height, if we're doing turns.
    fn expected_authority(&self, height: u64) -> Option<u32> {
        if !self.round_robin || self.authorities.is_empty() {
            return None;
        }
        let n = self.authorities.len() as u64;
        Some((height.saturating_sub(1) % n) as u32)
    }
}

pub fn sign_schnorr_sig(msg: &Buf32, sk: &Buf32) -> Result<Buf64, ConsensusError> {
    let sk =
        SecretKey::from_slice(sk.as_ref()).map_err(|_| ConsensusError::MissingAuthoringKey)?;
    let kp = Keypair::from_secret_key(SECP256K1, &sk);
    let msg = Message::from_digest(<[u8; 32]>::from(*msg));
    let sig = SECP256K1.sign_schnorr_no_aux_rand(&msg, &kp);
    Ok(Buf64::from(sig.serialize()))
}

pub fn verify_schnorr_sig(sig: &Buf64, msg: &Buf32, pk: &Buf32) -> bool {
    let msg = Message::from_digest(<[u8; 32]>::from(*msg));

    let pk = match XOnlyPublicKey::from_slice(pk.as_ref()) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let sig = match Signature::from_slice(sig.as_ref()) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    SECP256K1.verify_schnorr(&sig, &msg, &pk).is_ok()
}

/// Derives the x-only pubkey for a secret key.
pub fn compute_pubkey(sk: &Buf32) -> Option<Buf32> {
    let sk = SecretKey::from_slice(sk.as_ref()).ok()?;
    let (pk, _) = sk.x_only_public_key(SECP256K1);
    Some(Buf32::from(pk.serialize()))
}

impl SealEngine for AuthorityEngine {
    fn tag(&self) -> EngineTag {
        EngineTag::Authority
    }

    fn validate_seal(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        resulting_state_digest: &Buf32,
    ) -> Result<(), ConsensusError> {
        check_common(self.tag(), header, parent)?;

        let proof: AuthorityProof = decode_proof(header.seal())?;
        let pk = self
            .authorities
            .get(proof.authority as usize)
            .ok_or(ConsensusError::UnknownAuthority(proof.authority))?;

        if let Some(exp) = self.expected_authority(header.height()) {
            if proof.authority != exp {
                return Err(ConsensusError::WrongAuthority(
                    proof.authority,
                    header.height(),
                    exp,
                ));
            }
        }

        let commitment = header.seal_commitment(self.tag(), resulting_state_digest);
        if !verify_schnorr_sig(&proof.signature, &commitment, pk) {
            return Err(ConsensusError::BadSignature(proof.authority));
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
        ctx.check_interrupt()?;

        let sk = ctx
            .authoring_key
            .as_ref()
            .ok_or(ConsensusError::MissingAuthoringKey)?;
        let pk = compute_pubkey(sk).ok_or(ConsensusError::MissingAuthoringKey)?;
        let authority = self
            .authorities
            .iter()
            .position(|a| *a == pk)
            .ok_or(ConsensusError::NotAnAuthority)? as u32;

        if let Some(exp) = self.expected_authority(candidate.height()) {
            if authority != exp {
                return Err(ConsensusError::NotOurTurn(candidate.height()));
            }
        }

        let commitment = candidate.seal_commitment(self.tag(), resulting_state_digest);
        let signature = sign_schnorr_sig(&commitment, sk)?;
        let proof = borsh::to_vec(&AuthorityProof {
            authority,
            signature,
        })
        .expect("authority: enc proof");
        Ok(Seal::new(self.tag(), proof))
    }

    fn block_weight(&self, _header: &BlockHeader) -> Result<u128, ConsensusError> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Buf32 {
        Buf32::from([b; 32])
    }

    fn make_engine(round_robin: bool) -> AuthorityEngine {
        let pks = (1..=3).map(|b| compute_pubkey(&key(b)).unwrap()).collect();
        AuthorityEngine::new(pks, round_robin)
    }

    fn parent_header() -> BlockHeader {
        HeaderTemplate::new(BlockId::null(), 0, Buf32::zero(), Buf32::zero())
            .complete_with(Seal::new(EngineTag::Authority, Vec::new()))
    }

    fn candidate(parent: &BlockHeader, exdigest: u8) -> HeaderTemplate {
        HeaderTemplate::new(
            parent.get_blockid(),
            parent.height() + 1,
            Buf32::from([7; 32]),
            Buf32::from([exdigest; 32]),
        )
    }

    fn ctx(b: u8) -> SealContext {
        SealContext {
            authoring_key: Some(key(b)),
            ..Default::default()
        }
    }

    #[test]
    fn test_schnorr_signature_pass() {
        let msg = Buf32::from([3; 32]);
        let mut mod_msg = msg;
        mod_msg.as_mut_slice()[0] = 4;

        let sk = key(9);
        let pk = compute_pubkey(&sk).unwrap();

        let sig = sign_schnorr_sig(&msg, &sk).unwrap();
        assert!(verify_schnorr_sig(&sig, &msg, &pk));
        assert!(!verify_schnorr_sig(&sig, &mod_msg, &pk));
    }

    #[test]
    fn test_seal_validates() {
        let engine = make_engine(false);
        let parent = parent_header();
        let tmplt = candidate(&parent, 1);
        let seal = engine
            .seal(&tmplt, &parent, tmplt.state_digest(), &ctx(2))
            .unwrap();
        let header = tmplt.complete_with(seal);

        engine
            .validate_seal(&header, &parent, header.state_digest())
            .unwrap();
        assert_eq!(engine.block_weight(&header), Ok(1));
    }

    #[test]
    fn test_seal_not_transferable() {
        let engine = make_engine(false);
        let parent = parent_header();
        let tmplt = candidate(&parent, 1);
        let seal = engine
            .seal(&tmplt, &parent, tmplt.state_digest(), &ctx(1))
            .unwrap();
        let header = tmplt.complete_with(seal.clone());

        let other = candidate(&parent, 2).complete_with(seal);
        assert_eq!(
            engine.validate_seal(&other, &parent, other.state_digest()),
            Err(ConsensusError::BadSignature(0))
        );
        assert_eq!(
            engine.validate_seal(&header, &parent, &Buf32::zero()),
            Err(ConsensusError::BadSignature(0))
        );
    }

    #[test]
    fn test_not_an_authority() {
        let engine = make_engine(false);
        let parent = parent_header();
        let tmplt = candidate(&parent, 1);
        assert_eq!(
            engine.seal(&tmplt, &parent, tmplt.state_digest(), &ctx(7)),
            Err(ConsensusError::NotAnAuthority)
        );
        assert_eq!(
            engine.seal(&tmplt, &parent, tmplt.state_digest(), &SealContext::default()),
            Err(ConsensusError::MissingAuthoringKey)
        );
    }

    #[test]
    fn test_round_robin() {
        let engine = make_engine(true);
        let parent = parent_header();
        let tmplt = candidate(&parent, 1);

        // Height 1 belongs to the first authority.
        assert_eq!(
            engine.seal(&tmplt, &parent, tmplt.state_digest(), &ctx(2)),
            Err(ConsensusError::NotOurTurn(1))
        );

        // A seal from the wrong authority is rejected even if the signature
        // is fine.
        let free = make_engine(false);
        let seal = free
            .seal(&tmplt, &parent, tmplt.state_digest(), &ctx(2))
            .unwrap();
        let header = tmplt.clone().complete_with(seal);
        assert_eq!(
            engine.validate_seal(&header, &parent, header.state_digest()),
            Err(ConsensusError::WrongAuthority(1, 1, 0))
        );

        let seal = engine
            .seal(&tmplt, &parent, tmplt.state_digest(), &ctx(1))
            .unwrap();
        let header = tmplt.complete_with(seal);
        engine
            .validate_seal(&header, &parent, header.state_digest())
            .unwrap();
    }

    #[test]
    fn test_unknown_authority() {
        let engine = make_engine(false);
        let parent = parent_header();
        let proof = borsh::to_vec(&AuthorityProof {
            authority: 5,
            signature: Buf64::zero(),
        })
        .unwrap();
        let header = candidate(&parent, 1).complete_with(Seal::new(EngineTag::Authority, proof));
        assert_eq!(
            engine.validate_seal(&header, &parent, header.state_digest()),
            Err(ConsensusError::UnknownAuthority(5))
        );
    }
}
