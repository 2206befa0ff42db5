use crate::bloom::BloomFilter;

/// Accumulates the user keys of a table under construction, then builds
/// the filter once the key count is known.
///
/// The table builder can't size the filter up front (key count is unknown
/// until `finish`), so keys are buffered and hashed in one pass at the end.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    bits_per_key: usize,
}

impl BloomFilterBuilder {
    pub fn new(bits_per_key: usize) -> BloomFilterBuilder {
        BloomFilterBuilder {
            keys: Vec::new(),
            bits_per_key,
        }
    }

    /// Record a user key. Consecutive duplicates (multiple versions of one
    /// key) are collapsed; the filter only needs each key once.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().is_none_or(|last| last != key) {
            self.keys.push(key.to_vec());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Build the final filter over every recorded key.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len().max(1), self.bits_per_key);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collapses_adjacent_duplicates() {
        let mut builder = BloomFilterBuilder::new(10);
        builder.add_key(b"same");
        builder.add_key(b"same");
        builder.add_key(b"other");
        assert_eq!(builder.keys.len(), 2);

        let filter = builder.build();
        assert!(filter.may_contain(b"same"));
        assert!(filter.may_contain(b"other"));
        assert!(!filter.may_contain(b"missing"));
    }
}
