/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Monotonically increasing sequence number assigned to every write.
/// Only the low 56 bits are usable; the top byte of the packed trailer
/// holds the value type.
pub type SequenceNumber = u64;

/// Largest representable sequence number (56 bits).
pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone — the key isn't removed, it's marked as
/// deleted until compaction proves no snapshot can still see older data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A delete (tombstone marker). Sorts before Put at equal sequence.
    Deletion = 0x00,
    /// A normal put operation.
    Value = 0x01,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<ValueType> {
        match byte {
            0x00 => Some(ValueType::Deletion),
            0x01 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Tag used when building seek targets. At a fixed user key, entries sort
/// by sequence descending then tag ascending, so (seq, Deletion) is the
/// smallest internal key whose sequence is <= seq.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Deletion;

/// Pack a sequence number and value type into the 8-byte trailer.
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    (sequence << 8) | value_type as u64
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC, type ASC) — the newest version
/// of a key always comes first during merging, and a tombstone outranks a
/// put written under the same sequence.
///
/// Encoded form: user key bytes followed by an 8-byte little-endian trailer
/// `(sequence << 8) | type`. All on-disk structures and the memtable store
/// the encoded form; the parsed form is for the read and compaction paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> InternalKey {
        InternalKey {
            user_key: user_key.to_vec(),
            sequence,
            value_type,
        }
    }

    /// Serialize to the encoded form: user_key + 8-byte trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + 8);
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&pack_sequence_and_type(self.sequence, self.value_type).to_le_bytes());
        buf
    }

    /// Parse an encoded internal key. Fails on short input or unknown tag.
    pub fn decode(data: &[u8]) -> Option<InternalKey> {
        let (user_key, sequence, value_type) = split_internal_key(data)?;
        Some(InternalKey {
            user_key: user_key.to_vec(),
            sequence,
            value_type,
        })
    }
}

/// Borrowing split of an encoded internal key into its three parts.
pub fn split_internal_key(data: &[u8]) -> Option<(&[u8], SequenceNumber, ValueType)> {
    if data.len() < 8 {
        return None;
    }
    let split = data.len() - 8;
    let packed = u64::from_le_bytes(data[split..].try_into().unwrap());
    let value_type = ValueType::from_u8((packed & 0xff) as u8)?;
    Some((&data[..split], packed >> 8, value_type))
}

/// The user-key prefix of an encoded internal key.
/// Callers must only pass well-formed encoded keys.
pub fn extract_user_key(data: &[u8]) -> &[u8] {
    debug_assert!(data.len() >= 8, "internal key too short");
    &data[..data.len() - 8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_key_roundtrip() {
        let ik = InternalKey::new(b"user_key", 1234, ValueType::Value);
        let encoded = ik.encode();
        assert_eq!(encoded.len(), 8 + 8);
        let decoded = InternalKey::decode(&encoded).unwrap();
        assert_eq!(decoded, ik);
    }

    #[test]
    fn split_rejects_short_and_bad_tag() {
        assert!(split_internal_key(b"short").is_none());
        let mut encoded = InternalKey::new(b"k", 7, ValueType::Deletion).encode();
        let n = encoded.len();
        encoded[n - 8] = 0x7f; // unknown tag byte
        assert!(split_internal_key(&encoded).is_none());
    }

    #[test]
    fn max_sequence_fits() {
        let ik = InternalKey::new(b"k", MAX_SEQUENCE, ValueType::Value);
        let decoded = InternalKey::decode(&ik.encode()).unwrap();
        assert_eq!(decoded.sequence, MAX_SEQUENCE);
    }
}
