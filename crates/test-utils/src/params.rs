use tessera_consensus_logic::engine::compute_pubkey;
use tessera_primitives::{buf::Buf32, params::*};

fn gen_consensus_params(seal_rule: SealRule) -> ConsensusParams {
    ConsensusParams {
        seal_rule,
        max_block_extrinsics: 64,
        max_extrinsic_size: 4096,
    }
}

/// Params for proof of work with a minimum difficulty low enough that
/// sealing is instant.
pub fn gen_params() -> Params {
    gen_params_with_work(1)
}

pub fn gen_params_with_work(min_difficulty: u64) -> Params {
    Params {
        consensus: gen_consensus_params(SealRule::WorkThreshold { min_difficulty }),
        run: RunParams {
            finality_depth: 8,
            ..Default::default()
        },
    }
}

/// Secret keys for test authorities.  These are deterministic so tests are
/// reproducible.
pub fn authority_keys(n: usize) -> Vec<Buf32> {
    (0..n).map(|i| Buf32::from([i as u8 + 1; 32])).collect()
}

/// Params for `n` authorities, along with their secret keys.
pub fn gen_authority_params(n: usize, round_robin: bool) -> (Params, Vec<Buf32>) {
    let keys = authority_keys(n);
    let authorities = keys
        .iter()
        .map(|sk| compute_pubkey(sk).expect("test: derive authority pubkey"))
        .collect();

    let params = Params {
        consensus: gen_consensus_params(SealRule::Authority {
            authorities,
            round_robin,
        }),
        run: RunParams {
            finality_depth: 8,
            ..Default::default()
        },
    };
    (params, keys)
}
