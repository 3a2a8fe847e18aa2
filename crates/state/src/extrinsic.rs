//! Extrinsics and the calls they carry.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::{constants::BALANCE_KEY_PREFIX, hash, prelude::*};

/// Opaque unit of intent submitted to the chain.  The payload is the borsh
/// encoding of a [`Call`], but nothing outside the executor should care.
#[derive(Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Extrinsic {
    payload: Vec<u8>,

    /// Ordering hint from the pool, higher goes first.  Part of the identity.
    priority: u64,
}

impl Extrinsic {
    pub fn new(payload: Vec<u8>, priority: u64) -> Self {
        Self { payload, priority }
    }

    /// Encodes a call as the payload.
    pub fn from_call(call: &Call, priority: u64) -> Self {
        let payload = borsh::to_vec(call).expect("extrinsic: enc call");
        Self::new(payload, priority)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }

    pub fn compute_id(&self) -> ExtrinsicId {
        ExtrinsicId::from(hash::compute_borsh_hash(self))
    }

    /// Size we charge against pool and block limits.
    pub fn encoded_size(&self) -> usize {
        self.payload.len()
    }

    /// Tries to decode the payload as a call.
    pub fn decode_call(&self) -> Result<Call, borsh::io::Error> {
        borsh::from_slice(&self.payload)
    }
}

/// The operations an extrinsic can request.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Call {
    /// Writes a raw key.
    Set { key: Vec<u8>, value: Vec<u8> },

    /// Deletes a raw key, which must exist.
    Remove { key: Vec<u8> },

    /// Creates new balance out of nothing.
    Mint { account: Buf32, amount: u64 },

    /// Destroys balance.
    Burn { account: Buf32, amount: u64 },

    /// Moves balance between accounts.
    Transfer { from: Buf32, to: Buf32, amount: u64 },
}

/// Key that an account's balance lives under.
pub fn balance_key(account: &Buf32) -> Vec<u8> {
    let mut key = Vec::with_capacity(BALANCE_KEY_PREFIX.len() + Buf32::LEN);
    key.extend_from_slice(BALANCE_KEY_PREFIX);
    key.extend_from_slice(account.as_slice());
    key
}

/// Returns if a raw key is in the namespace only balance calls may touch.
pub fn is_reserved_key(key: &[u8]) -> bool {
    key.starts_with(BALANCE_KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_depends_on_priority() {
        let call = Call::Set {
            key: b"x".to_vec(),
            value: b"1".to_vec(),
        };
        let a = Extrinsic::from_call(&call, 1);
        let b = Extrinsic::from_call(&call, 2);
        assert_ne!(a.compute_id(), b.compute_id());
        assert_eq!(a.decode_call().unwrap(), call);
    }

    #[test]
    fn test_garbage_payload_does_not_decode() {
        let e = Extrinsic::new(vec![0xff, 0x00], 0);
        assert!(e.decode_call().is_err());
    }

    #[test]
    fn test_balance_key_is_reserved() {
        let key = balance_key(&Buf32::from([5; 32]));
        assert!(is_reserved_key(&key));
        assert!(!is_reserved_key(b"balance"));
    }
}
