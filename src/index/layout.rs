//! Key/value layout contract.

use std::cmp::Ordering;
use std::fmt::Debug;

/// Describes how keys and values are ordered and serialized.
///
/// Every key occupies exactly [`key_size`](Layout::key_size) bytes on a page
/// and every value [`value_size`](Layout::value_size) bytes. The
/// [`identifier`](Layout::identifier) is stored in the meta page; reopening a
/// tree with a layout of a different identifier or different sizes fails with
/// [`Error::IncompatibleFormat`](crate::Error::IncompatibleFormat).
///
/// `compare` must be a total order consistent with the encoding: a key read
/// back with `read_key` compares equal to the key that was written.
pub trait Layout: Send + Sync + 'static {
    type Key: Clone + Debug + Send + Sync;
    type Value: Clone + Debug + Send + Sync;

    /// Stable identifier of the encoding, persisted in the meta page.
    fn identifier(&self) -> u64;

    fn key_size(&self) -> usize;

    fn value_size(&self) -> usize;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    /// Encode `key` into `buf`, which is exactly `key_size` bytes long.
    fn write_key(&self, key: &Self::Key, buf: &mut [u8]);

    fn read_key(&self, buf: &[u8]) -> Self::Key;

    /// Encode `value` into `buf`, which is exactly `value_size` bytes long.
    fn write_value(&self, value: &Self::Value, buf: &mut [u8]);

    fn read_value(&self, buf: &[u8]) -> Self::Value;
}

/// `i64` keys and values, little-endian, with optional key padding.
///
/// Padding makes every key occupy more space on a page without changing its
/// meaning, which lets tests reach deep trees with few entries.
///
/// # Example
/// ```
/// use genbtree::{Layout, SimpleLongLayout};
///
/// let layout = SimpleLongLayout::new().with_key_padding(24);
/// assert_eq!(layout.key_size(), 32);
/// assert_eq!(layout.value_size(), 8);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleLongLayout {
    key_padding: usize,
}

impl SimpleLongLayout {
    const IDENTIFIER: u64 = 0x5349_4d50_4c4f_4e47;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_padding(mut self, key_padding: usize) -> Self {
        self.key_padding = key_padding;
        self
    }
}

impl Layout for SimpleLongLayout {
    type Key = i64;
    type Value = i64;

    fn identifier(&self) -> u64 {
        Self::IDENTIFIER ^ self.key_padding as u64
    }

    fn key_size(&self) -> usize {
        8 + self.key_padding
    }

    fn value_size(&self) -> usize {
        8
    }

    fn compare(&self, a: &i64, b: &i64) -> Ordering {
        a.cmp(b)
    }

    fn write_key(&self, key: &i64, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&key.to_le_bytes());
        buf[8..].fill(0);
    }

    fn read_key(&self, buf: &[u8]) -> i64 {
        read_i64(buf)
    }

    fn write_value(&self, value: &i64, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&value.to_le_bytes());
    }

    fn read_value(&self, buf: &[u8]) -> i64 {
        read_i64(buf)
    }
}

fn read_i64(buf: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    i64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_with_padding() {
        let layout = SimpleLongLayout::new().with_key_padding(4);
        let mut buf = [0xFFu8; 12];
        layout.write_key(&-7, &mut buf);

        assert_eq!(&buf[8..], &[0, 0, 0, 0]);
        assert_eq!(layout.read_key(&buf), -7);
    }

    #[test]
    fn test_padding_changes_identifier() {
        let plain = SimpleLongLayout::new();
        let padded = SimpleLongLayout::new().with_key_padding(8);
        assert_ne!(plain.identifier(), padded.identifier());
    }

    #[test]
    fn test_compare_is_signed() {
        let layout = SimpleLongLayout::new();
        assert_eq!(layout.compare(&-1, &1), Ordering::Less);
        assert_eq!(layout.compare(&i64::MAX, &i64::MIN), Ordering::Greater);
    }
}
