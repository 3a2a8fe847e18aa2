//! Block state transition.  Everything here is a pure function of the parent
//! state and the extrinsics.

use tessera_primitives::{constants::MAX_VALUE_LEN, prelude::*};
use tessera_state::{
    block::compute_extrinsics_digest,
    extrinsic::{balance_key, is_reserved_key},
    prelude::*,
    state_op::{apply_write_batch_to_state, WriteBatch},
};
use tracing::*;

use crate::errors::{ExtrinsicError, TsnError};

/// Result of applying a list of extrinsics to a parent state.
#[derive(Clone, Debug)]
pub struct TransitionOutput {
    pub state: State,
    pub state_digest: Buf32,
    pub extrinsics_digest: Buf32,
}

/// Candidates split by whether they apply on top of a parent state, in the
/// order they were given.
#[derive(Clone, Debug)]
pub struct Selection {
    pub included: Vec<Extrinsic>,
    pub excluded: Vec<(Extrinsic, ExtrinsicError)>,
    pub output: TransitionOutput,
}

/// Applies a block's extrinsics in order to a copy of the parent state.
///
/// If any extrinsic fails, the whole transition fails and the block carrying
/// it is invalid.  Import and authoring both go through this so they can't
/// disagree.
pub fn apply_block_extrinsics(
    parent_state: &State,
    extrinsics: &[Extrinsic],
) -> Result<TransitionOutput, TsnError> {
    let mut state = parent_state.clone();

    for (index, ext) in extrinsics.iter().enumerate() {
        let batch = compute_extrinsic_writes(&state, ext).map_err(|source| TsnError::Extrinsic {
            index,
            id: ext.compute_id(),
            source,
        })?;
        apply_write_batch_to_state(&mut state, batch);
    }

    Ok(finish_transition(state, extrinsics))
}

/// Applies candidates one at a time, keeping the ones that succeed and
/// skipping the ones that don't.
///
/// Each application is all-or-nothing, so running [`apply_block_extrinsics`]
/// on the included list reproduces the same state.
pub fn select_applicable(parent_state: &State, candidates: Vec<Extrinsic>) -> Selection {
    let mut state = parent_state.clone();
    let mut included = Vec::with_capacity(candidates.len());
    let mut excluded = Vec::new();

    for ext in candidates {
        match compute_extrinsic_writes(&state, &ext) {
            Ok(batch) => {
                apply_write_batch_to_state(&mut state, batch);
                included.push(ext);
            }
            Err(e) => {
                debug!(id = %ext.compute_id(), err = %e, "excluding extrinsic");
                excluded.push((ext, e));
            }
        }
    }

    let output = finish_transition(state, &included);
    Selection {
        included,
        excluded,
        output,
    }
}

fn finish_transition(mut state: State, extrinsics: &[Extrinsic]) -> TransitionOutput {
    state.bump_version();
    let state_digest = state.digest();
    TransitionOutput {
        state,
        state_digest,
        extrinsics_digest: compute_extrinsics_digest(extrinsics),
    }
}

/// Computes the writes a single extrinsic makes against the current state,
/// without changing it.
pub fn compute_extrinsic_writes(state: &State, ext: &Extrinsic) -> Result<WriteBatch, ExtrinsicError> {
    let call = ext.decode_call().map_err(|_| ExtrinsicError::InvalidPayload)?;
    let mut batch = WriteBatch::new_empty();

    match call {
        Call::Set { key, value } => {
            check_raw_key(&key)?;
            if value.len() > MAX_VALUE_LEN {
                return Err(ExtrinsicError::ValueTooLarge(value.len(), MAX_VALUE_LEN));
            }
            batch.put(key, value);
        }

        Call::Remove { key } => {
            check_raw_key(&key)?;
            if !state.contains_key(&key) {
                return Err(ExtrinsicError::MissingKey);
            }
            batch.delete(key);
        }

        Call::Mint { account, amount } => {
            check_amount(amount)?;
            let bal = get_balance(state, &account)?;
            let new_bal = bal
                .checked_add(amount)
                .ok_or(ExtrinsicError::BalanceOverflow(account))?;
            write_balance(&mut batch, &account, new_bal);
        }

        Call::Burn { account, amount } => {
            check_amount(amount)?;
            let bal = get_balance(state, &account)?;
            let new_bal = debit(&account, bal, amount)?;
            write_balance(&mut batch, &account, new_bal);
        }

        Call::Transfer { from, to, amount } => {
            check_amount(amount)?;
            let from_bal = get_balance(state, &from)?;
            let new_from_bal = debit(&from, from_bal, amount)?;

            // A self-transfer only has to be affordable.
            if from != to {
                let to_bal = get_balance(state, &to)?;
                let new_to_bal = to_bal
                    .checked_add(amount)
                    .ok_or(ExtrinsicError::BalanceOverflow(to))?;
                write_balance(&mut batch, &from, new_from_bal);
                write_balance(&mut batch, &to, new_to_bal);
            }
        }
    }

    Ok(batch)
}

fn check_raw_key(key: &[u8]) -> Result<(), ExtrinsicError> {
    if key.is_empty() {
        return Err(ExtrinsicError::EmptyKey);
    }
    if is_reserved_key(key) {
        return Err(ExtrinsicError::ReservedKey);
    }
    Ok(())
}

fn check_amount(amount: u64) -> Result<(), ExtrinsicError> {
    if amount == 0 {
        return Err(ExtrinsicError::ZeroAmount);
    }
    Ok(())
}

fn debit(account: &Buf32, bal: u64, amount: u64) -> Result<u64, ExtrinsicError> {
    bal.checked_sub(amount)
        .ok_or(ExtrinsicError::InsufficientBalance(*account, bal, amount))
}

/// Reads an account's balance, which is zero if there's no entry.
pub fn get_balance(state: &State, account: &Buf32) -> Result<u64, ExtrinsicError> {
    match state.get(&balance_key(account)) {
        Some(raw) => {
            borsh::from_slice(raw).map_err(|_| ExtrinsicError::MalformedBalance(*account))
        }
        None => Ok(0),
    }
}

fn write_balance(batch: &mut WriteBatch, account: &Buf32, bal: u64) {
    let key = balance_key(account);
    if bal == 0 {
        batch.delete(key);
    } else {
        batch.put(key, borsh::to_vec(&bal).expect("transition: enc balance"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(k: &str, v: &str, prio: u64) -> Extrinsic {
        Extrinsic::from_call(
            &Call::Set {
                key: k.as_bytes().to_vec(),
                value: v.as_bytes().to_vec(),
            },
            prio,
        )
    }

    fn acct(b: u8) -> Buf32 {
        Buf32::from([b; 32])
    }

    fn mint(b: u8, amount: u64) -> Extrinsic {
        Extrinsic::from_call(
            &Call::Mint {
                account: acct(b),
                amount,
            },
            0,
        )
    }

    fn transfer(from: u8, to: u8, amount: u64) -> Extrinsic {
        Extrinsic::from_call(
            &Call::Transfer {
                from: acct(from),
                to: acct(to),
                amount,
            },
            0,
        )
    }

    #[test]
    fn test_set_x() {
        let out = apply_block_extrinsics(&State::new(), &[set("x", "1", 0)]).unwrap();
        assert_eq!(out.state.get(b"x"), Some(&b"1"[..]));
        assert_eq!(out.state.version(), 1);

        let expected = State::from_entries(vec![(b"x".to_vec(), b"1".to_vec())]);
        assert_eq!(out.state_digest, expected.digest());
    }

    #[test]
    fn test_deterministic() {
        let parent = State::from_entries(vec![(b"a".to_vec(), b"0".to_vec())]);
        let exts = vec![set("x", "1", 3), mint(1, 50), transfer(1, 2, 20), set("a", "9", 1)];
        let a = apply_block_extrinsics(&parent, &exts).unwrap();
        let b = apply_block_extrinsics(&parent, &exts).unwrap();
        assert_eq!(a.state_digest, b.state_digest);
        assert_eq!(a.extrinsics_digest, b.extrinsics_digest);
        assert_eq!(a.state, b.state);
    }

    #[test]
    fn test_order_matters() {
        let exts = vec![set("x", "1", 0), set("x", "2", 0)];
        let a = apply_block_extrinsics(&State::new(), &exts).unwrap();
        let rev: Vec<_> = exts.into_iter().rev().collect();
        let b = apply_block_extrinsics(&State::new(), &rev).unwrap();
        assert_ne!(a.state_digest, b.state_digest);
    }

    #[test]
    fn test_abort_on_failure() {
        let exts = vec![set("x", "1", 0), transfer(1, 2, 5)];
        let err = apply_block_extrinsics(&State::new(), &exts).unwrap_err();
        assert_eq!(err.index(), 1);
        assert!(matches!(
            err,
            TsnError::Extrinsic {
                source: ExtrinsicError::InsufficientBalance(_, 0, 5),
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_payload() {
        let err = apply_block_extrinsics(&State::new(), &[Extrinsic::new(vec![0xff], 0)]);
        assert!(matches!(
            err,
            Err(TsnError::Extrinsic {
                source: ExtrinsicError::InvalidPayload,
                ..
            })
        ));
    }

    #[test]
    fn test_set_rules() {
        let s = State::new();
        let reserved = Extrinsic::from_call(
            &Call::Set {
                key: balance_key(&acct(1)),
                value: vec![1],
            },
            0,
        );
        assert_eq!(
            compute_extrinsic_writes(&s, &reserved),
            Err(ExtrinsicError::ReservedKey)
        );
        assert_eq!(
            compute_extrinsic_writes(&s, &set("", "1", 0)),
            Err(ExtrinsicError::EmptyKey)
        );

        let big = Extrinsic::from_call(
            &Call::Set {
                key: b"k".to_vec(),
                value: vec![0; MAX_VALUE_LEN + 1],
            },
            0,
        );
        assert!(matches!(
            compute_extrinsic_writes(&s, &big),
            Err(ExtrinsicError::ValueTooLarge(_, MAX_VALUE_LEN))
        ));
    }

    #[test]
    fn test_remove_missing_key() {
        let rm = Extrinsic::from_call(&Call::Remove { key: b"x".to_vec() }, 0);
        assert_eq!(
            compute_extrinsic_writes(&State::new(), &rm),
            Err(ExtrinsicError::MissingKey)
        );
        let out = apply_block_extrinsics(&State::new(), &[set("x", "1", 0), rm]).unwrap();
        assert!(out.state.is_empty());
    }

    #[test]
    fn test_balances() {
        let exts = vec![mint(1, 100), transfer(1, 2, 40), transfer(2, 2, 40)];
        let out = apply_block_extrinsics(&State::new(), &exts).unwrap();
        assert_eq!(get_balance(&out.state, &acct(1)), Ok(60));
        assert_eq!(get_balance(&out.state, &acct(2)), Ok(40));

        // Emptying an account deletes its entry.
        let burn = Extrinsic::from_call(
            &Call::Burn {
                account: acct(2),
                amount: 40,
            },
            0,
        );
        let out = apply_block_extrinsics(&out.state, &[burn]).unwrap();
        assert!(!out.state.contains_key(&balance_key(&acct(2))));
        assert_eq!(out.state.len(), 1);
    }

    #[test]
    fn test_mint_overflow_and_zero() {
        let out = apply_block_extrinsics(&State::new(), &[mint(1, u64::MAX)]).unwrap();
        assert_eq!(
            compute_extrinsic_writes(&out.state, &mint(1, 1)),
            Err(ExtrinsicError::BalanceOverflow(acct(1)))
        );
        assert_eq!(
            compute_extrinsic_writes(&out.state, &mint(1, 0)),
            Err(ExtrinsicError::ZeroAmount)
        );
    }

    #[test]
    fn test_select_applicable_matches_strict() {
        let candidates = vec![
            mint(1, 10),
            transfer(1, 2, 30),
            set("x", "1", 0),
            Extrinsic::new(vec![0xff], 0),
            transfer(1, 2, 10),
        ];
        let sel = select_applicable(&State::new(), candidates);
        assert_eq!(sel.included.len(), 3);
        assert_eq!(sel.excluded.len(), 2);
        assert_eq!(sel.excluded[1].1, ExtrinsicError::InvalidPayload);

        let strict = apply_block_extrinsics(&State::new(), &sel.included).unwrap();
        assert_eq!(strict.state_digest, sel.output.state_digest);
        assert_eq!(strict.extrinsics_digest, sel.output.extrinsics_digest);
    }
}
