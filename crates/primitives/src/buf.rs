use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::impl_buf;

/// Returned when converting a slice of the wrong length into a buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct BufLenError {
    expected: usize,
    actual: usize,
}

impl BufLenError {
    pub fn new(expected: usize, actual: usize) -> Self {
        Self { expected, actual }
    }
}

#[derive(Debug, Error)]
#[error("parse buf: {0}")]
pub struct BufParseError(#[from] hex::FromHexError);

// 32-byte buf, useful for hashes and schnorr pubkeys
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Buf32([u8; 32]);
impl_buf!(Buf32, 32);

// 64-byte buf, useful for schnorr signatures
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Buf64([u8; 64]);
impl_buf!(Buf64, 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buf32_hex_roundtrip() {
        let buf = Buf32::from([0xab; 32]);
        let s = format!("{buf:?}");
        assert_eq!(s.len(), 64);
        let parsed: Buf32 = s.parse().unwrap();
        assert_eq!(parsed, buf);

        let prefixed: Buf32 = format!("0x{s}").parse().unwrap();
        assert_eq!(prefixed, buf);
    }

    #[test]
    fn test_buf32_short_display() {
        let mut arr = [0u8; 32];
        arr[0] = 0x12;
        arr[31] = 0x34;
        assert_eq!(Buf32::from(arr).to_string(), "12000000..00000034");
    }

    #[test]
    fn test_buf_try_from_slice_len() {
        assert!(Buf32::try_from(&[0u8; 31][..]).is_err());
        assert!(Buf64::try_from(&[0u8; 64][..]).is_ok());
    }

    #[test]
    fn test_buf32_ordering_is_lexicographic() {
        let mut lo = [0u8; 32];
        lo[0] = 1;
        let mut hi = [0u8; 32];
        hi[0] = 2;
        assert!(Buf32::from(lo) < Buf32::from(hi));
    }

    #[test]
    fn test_buf32_serde_json() {
        let buf = Buf32::from([7; 32]);
        let json = serde_json::to_string(&buf).unwrap();
        let back: Buf32 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, buf);
    }
}
