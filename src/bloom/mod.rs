pub mod builder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any probed bit is 0 → key is DEFINITELY NOT in the set
/// - If all probed bits are 1 → key is PROBABLY in the set
///
/// One filter is built per sorted table over its user keys; point lookups
/// consult it before touching any data block, skipping tables that cannot
/// contain the target.
///
/// Sized by a bits-per-key budget (10 bits/key ≈ 1% false positives).
/// Hash trick: no need for k independent hash functions. Double hashing
/// h_i(key) = h1(key) + i * h2(key) (mod m), with h1/h2 the two halves of
/// one 128-bit hash.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create an empty filter sized for `expected_keys` at `bits_per_key`.
    pub fn new(expected_keys: usize, bits_per_key: usize) -> BloomFilter {
        let num_bits = (expected_keys * bits_per_key).max(64) as u32;
        // k = bits_per_key * ln(2), clamped to something sane.
        let num_hashes = ((bits_per_key as f64 * 0.69) as u32).clamp(1, 30);
        let num_words = (num_bits as usize).div_ceil(64);
        BloomFilter {
            bits: vec![0u64; num_words],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            if (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 0 {
                return false;
            }
        }
        true
    }

    /// Serialize for the table's filter block:
    /// `[num_hashes(4B)][num_bits(4B)][bit words (8B each, LE)]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize a filter read back from a table.
    pub fn decode(data: &[u8]) -> Result<BloomFilter> {
        if data.len() < 8 {
            return Err(Error::Corruption("filter block too short".into()));
        }
        let num_hashes = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let num_bits = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let words = &data[8..];
        if words.len() % 8 != 0 || words.len() / 8 != (num_bits as usize).div_ceil(64) {
            return Err(Error::Corruption("filter bit array size mismatch".into()));
        }
        if num_hashes == 0 || num_hashes > 30 {
            return Err(Error::Corruption(format!(
                "implausible filter hash count: {num_hashes}"
            )));
        }
        let bits = words
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(BloomFilter {
            bits,
            num_hashes,
            num_bits,
        })
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }
}

/// Split one 128-bit hash into the two halves used for double hashing.
fn hash_key(key: &[u8]) -> (u64, u64) {
    let hash128 = xxh3_128(key);
    ((hash128 & 0xFFFF_FFFF_FFFF_FFFF) as u64, (hash128 >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_match() {
        let mut bf = BloomFilter::new(100, 10);
        bf.insert(b"hello");
        assert!(bf.may_contain(b"hello"));
        assert!(!bf.may_contain(b"world"));
    }

    #[test]
    fn false_positive_rate_is_sane() {
        let mut bf = BloomFilter::new(1000, 10);
        for i in 0..1000u32 {
            bf.insert(format!("key_{i:06}").as_bytes());
        }
        for i in 0..1000u32 {
            assert!(bf.may_contain(format!("key_{i:06}").as_bytes()));
        }
        let false_positives = (0..10_000u32)
            .filter(|i| bf.may_contain(format!("absent_{i:06}").as_bytes()))
            .count();
        // 10 bits/key targets ~1%; allow generous slack.
        assert!(
            false_positives < 500,
            "false positive rate too high: {false_positives}/10000"
        );
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut bf = BloomFilter::new(50, 8);
        for i in 0..50u32 {
            bf.insert(format!("k{i}").as_bytes());
        }
        let decoded = BloomFilter::decode(&bf.encode()).unwrap();
        assert_eq!(decoded.num_hashes(), bf.num_hashes());
        assert_eq!(decoded.num_bits(), bf.num_bits());
        for i in 0..50u32 {
            assert!(decoded.may_contain(format!("k{i}").as_bytes()));
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(BloomFilter::decode(&[1, 2, 3]).is_err());
        let mut bf = BloomFilter::new(10, 10).encode();
        bf.truncate(bf.len() - 8);
        assert!(BloomFilter::decode(&bf).is_err());
    }
}
