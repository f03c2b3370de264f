//! Fixed-capacity byte strings used by the config record.
//!
//! Every buffer holds at most `N - 1` bytes so the persisted form always
//! carries a terminating zero inside its bounds. Contents are raw bytes:
//! SSIDs and passwords may hold anything the tokenizer can produce.

use std::borrow::Cow;
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// A value did not fit into its fixed-capacity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Value too long (max. {max})")]
pub struct TooLong {
    pub max: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Maximum number of content bytes.
    pub const CAPACITY: usize = N - 1;

    pub const fn empty() -> Self {
        Self { bytes: [0; N] }
    }

    /// Build from bytes, rejecting values that do not fit.
    pub fn new(value: &[u8]) -> Result<Self, TooLong> {
        if value.len() > Self::CAPACITY {
            return Err(TooLong { max: Self::CAPACITY });
        }
        Ok(Self::truncated(value))
    }

    /// Build from bytes, cutting the value at capacity.
    pub fn truncated(value: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        let len = value
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(value.len())
            .min(Self::CAPACITY);
        bytes[..len].copy_from_slice(&value[..len]);
        Self { bytes }
    }

    /// Rebuild from a persisted buffer, forcing termination within bounds.
    pub fn from_raw(raw: &[u8; N]) -> Self {
        Self::truncated(raw)
    }

    pub fn raw(&self) -> &[u8; N] {
        &self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.bytes.iter().position(|b| *b == 0).unwrap_or(N);
        &self.bytes[..len]
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_overflow() {
        assert!(FixedStr::<8>::new(b"1234567").is_ok());
        assert_eq!(FixedStr::<8>::new(b"12345678"), Err(TooLong { max: 7 }));
    }

    #[test]
    fn test_truncated_keeps_terminator() {
        let s = FixedStr::<4>::truncated(b"abcdef");
        assert_eq!(s.as_bytes(), b"abc");
        assert_eq!(s.raw()[3], 0);
    }

    #[test]
    fn test_from_raw_normalizes_garbage() {
        let s = FixedStr::<6>::from_raw(&[b'h', b'i', 0, 0xAA, 0xBB, 0xCC]);
        assert_eq!(s, FixedStr::<6>::truncated(b"hi"));
        assert_eq!(s.raw(), &[b'h', b'i', 0, 0, 0, 0]);
    }

    #[test]
    fn test_non_utf8_bytes_survive() {
        let s = FixedStr::<8>::new(&[0xC3, 0x28, b'x']).unwrap();
        assert_eq!(s.as_bytes(), &[0xC3, 0x28, b'x']);
        assert_eq!(s.len(), 3);
    }
}
