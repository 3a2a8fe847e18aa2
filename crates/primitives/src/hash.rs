//! Common wrapper around whatever we choose our native hash function to be.

use borsh::BorshSerialize;
use digest::Digest;
use sha2::Sha256;

use crate::buf::Buf32;

/// Direct untagged hash.
pub fn raw(buf: &[u8]) -> Buf32 {
    Buf32::from(<[u8; 32]>::from(Sha256::digest(buf)))
}

/// Hash of the concatenation of some buffers, without copying them into one.
pub fn concat(parts: &[&[u8]]) -> Buf32 {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    Buf32::from(<[u8; 32]>::from(hasher.finalize()))
}

/// Hashes the borsh encoding of a value, streaming it into the hasher.
pub fn compute_borsh_hash<T: BorshSerialize>(v: &T) -> Buf32 {
    let mut hasher = Sha256::new();
    v.serialize(&mut hasher).expect("hash: borsh into hasher");
    let result = hasher.finalize();
    let arr: [u8; 32] = result.into();
    Buf32::from(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borsh_hash_matches_raw_of_encoding() {
        let v = (42u64, vec![1u8, 2, 3]);
        let enc = borsh::to_vec(&v).unwrap();
        assert_eq!(compute_borsh_hash(&v), raw(&enc));
    }

    #[test]
    fn test_concat_matches_raw() {
        assert_eq!(concat(&[b"ab", b"cd"]), raw(b"abcd"));
    }
}
