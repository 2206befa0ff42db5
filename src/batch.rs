//! Atomically-applied groups of put/delete operations.
//!
//! Wire layout (also the payload of one WAL logical record):
//!
//! ```text
//! ┌──────────────┬───────────┬──────────────────────────────────────┐
//! │ sequence(8B) │ count(4B) │ records...                           │
//! └──────────────┴───────────┴──────────────────────────────────────┘
//! record: [tag(1B)][key_len varint][key]([val_len varint][value] if put)
//! ```
//!
//! Every entry is applied under `sequence + position`, so the last
//! operation on a key within a batch wins and intermediate states are
//! never observable.

use crate::encoding::{get_length_prefixed_slice, put_length_prefixed_slice};
use crate::error::{Error, Result};
use crate::types::{SequenceNumber, ValueType};

/// Fixed prefix: 8-byte sequence + 4-byte count.
pub const BATCH_HEADER_SIZE: usize = 12;

/// An ordered sequence of put/delete operations, applied as one unit.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        WriteBatch::new()
    }
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch {
            rep: vec![0; BATCH_HEADER_SIZE],
        }
    }

    /// Rebuild a batch from its wire form (WAL replay path).
    pub fn from_contents(rep: Vec<u8>) -> Result<WriteBatch> {
        if rep.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("write batch header truncated".into()));
        }
        Ok(WriteBatch { rep })
    }

    /// Queue an insert-or-update of `key` to `value`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queue a tombstone for `key`.
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Remove all queued operations.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Number of queued operations.
    pub fn count(&self) -> u32 {
        u32::from_le_bytes(self.rep[8..12].try_into().unwrap())
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Base sequence number this batch was (or will be) committed under.
    pub fn sequence(&self) -> SequenceNumber {
        u64::from_le_bytes(self.rep[0..8].try_into().unwrap())
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[0..8].copy_from_slice(&sequence.to_le_bytes());
    }

    /// Total encoded size: the header plus the sum of each operation's
    /// encoded size.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// The wire form, as appended to the WAL.
    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Walk the batch in order, handing each operation its effective
    /// sequence number (`base + position`).
    pub(crate) fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(ValueType, SequenceNumber, &[u8], &[u8]) -> Result<()>,
    {
        let base = self.sequence();
        let mut data = &self.rep[BATCH_HEADER_SIZE..];
        let mut found: u32 = 0;
        while !data.is_empty() {
            let tag = ValueType::from_u8(data[0])
                .ok_or_else(|| Error::Corruption(format!("bad batch record tag: {}", data[0])))?;
            data = &data[1..];
            let (key, consumed) = get_length_prefixed_slice(data)?;
            data = &data[consumed..];
            match tag {
                ValueType::Value => {
                    let (value, consumed) = get_length_prefixed_slice(data)?;
                    data = &data[consumed..];
                    f(tag, base + found as u64, key, value)?;
                }
                ValueType::Deletion => {
                    f(tag, base + found as u64, key, &[])?;
                }
            }
            found += 1;
        }
        if found != self.count() {
            return Err(Error::Corruption(format!(
                "write batch count mismatch: header says {}, found {}",
                self.count(),
                found
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::varint_length;

    fn collect(batch: &WriteBatch) -> Vec<(ValueType, u64, Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        batch
            .for_each(|t, seq, k, v| {
                out.push((t, seq, k.to_vec(), v.to_vec()));
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn batch_records_operations_in_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete(b"a");
        batch.put(b"b", b"2");
        batch.set_sequence(100);

        let ops = collect(&batch);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], (ValueType::Value, 100, b"a".to_vec(), b"1".to_vec()));
        assert_eq!(ops[1], (ValueType::Deletion, 101, b"a".to_vec(), Vec::new()));
        assert_eq!(ops[2], (ValueType::Value, 102, b"b".to_vec(), b"2".to_vec()));
    }

    #[test]
    fn approximate_size_sums_encoded_operations() {
        let mut batch = WriteBatch::new();
        assert_eq!(batch.approximate_size(), BATCH_HEADER_SIZE);

        let mut expected = BATCH_HEADER_SIZE;
        for (key, value) in [(b"k1".as_ref(), b"val1".as_ref()), (b"key_two", b"v")] {
            batch.put(key, value);
            expected += 1
                + varint_length(key.len() as u64)
                + key.len()
                + varint_length(value.len() as u64)
                + value.len();
        }
        batch.delete(b"k1");
        expected += 1 + varint_length(2) + 2;

        assert_eq!(batch.approximate_size(), expected);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.clear();
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.approximate_size(), BATCH_HEADER_SIZE);
        assert!(collect(&batch).is_empty());
    }

    #[test]
    fn count_mismatch_is_corruption() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        let mut rep = batch.contents().to_vec();
        rep[8..12].copy_from_slice(&5u32.to_le_bytes());
        let bad = WriteBatch::from_contents(rep).unwrap();
        assert!(bad.for_each(|_, _, _, _| Ok(())).is_err());
    }
}
