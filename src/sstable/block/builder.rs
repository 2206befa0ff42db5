use crate::encoding::put_varint32;

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Keys are prefix-compressed against their predecessor; every
/// `restart_interval` entries a restart point stores the full key, which
/// bounds the scan cost of a lookup and gives binary search its anchors.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │ Entry 0: [shared(var)][non_shared(var)][val_len(var)][key Δ][value] │
/// │ Entry 1: ...                                                 │
/// ├──────────────────────────────────────────────────────────────┤
/// │ Restart array: [offset_0(4B)]...[offset_R(4B)]               │
/// │ Num restarts (4B)                                            │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// `shared` is always 0 at a restart point, so iteration can begin at any
/// restart offset without earlier context.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries since the last restart point.
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
    num_entries: usize,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> BlockBuilder {
        assert!(restart_interval >= 1);
        BlockBuilder {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            last_key: Vec::new(),
            num_entries: 0,
        }
    }

    /// Add a key-value pair. Keys MUST arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;
        if self.counter < self.restart_interval {
            // Prefix-compress against the previous key.
            let max = self.last_key.len().min(key.len());
            while shared < max && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart: store the full key.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.num_entries += 1;
    }

    /// Finalize the block: append the restart array and its length.
    pub fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            self.buffer.extend_from_slice(&restart.to_le_bytes());
        }
        self.buffer
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buffer
    }

    /// Current size of the block once finalized.
    pub fn size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// The most recently added key.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
