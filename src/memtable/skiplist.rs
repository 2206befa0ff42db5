use std::cmp::Ordering;

use rand::Rng;

use crate::comparator::InternalKeyComparator;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Branching factor: each node is promoted one level with probability 1/4.
const BRANCHING: u32 = 4;

/// Arena slot index. Slot 0 is the head sentinel.
type Link = Option<usize>;

/// A single node in the skip list.
///
/// Each node has `next.len()` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
struct SkipNode {
    /// Encoded internal key. Empty for the head sentinel.
    key: Vec<u8>,
    value: Vec<u8>,
    /// Indices into `SkipList::nodes`, one per level.
    next: Vec<Link>,
}

/// A probabilistic sorted map over encoded internal keys.
///
/// Nodes live in an arena (`Vec`) and link by index — no unsafe, good
/// cache locality, and no back-pointers needed: backward traversal
/// re-descends from the head, which stays O(log n).
///
/// Insert-only: internal keys are unique (the sequence number
/// disambiguates), so nothing is ever overwritten or removed.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    cmp: InternalKeyComparator,
    height: usize,
    len: usize,
    size_bytes: usize,
}

impl SkipList {
    pub fn new(cmp: InternalKeyComparator) -> SkipList {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            next: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            cmp,
            height: 1,
            len: 0,
            size_bytes: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage of the stored entries.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Compare a node's key against a target. The head sentinel sorts
    /// before everything.
    fn key_cmp(&self, node: usize, target: &[u8]) -> Ordering {
        if node == 0 {
            return Ordering::Less;
        }
        self.cmp.compare(&self.nodes[node].key, target)
    }

    /// Insert a key-value pair. Keys must be unique; equal keys are
    /// spliced adjacent and the first inserted wins on lookup.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        // Find the insertion point at each level, tracking predecessors.
        let mut prev = [0usize; MAX_HEIGHT];
        let mut x = 0usize;
        for level in (0..self.height).rev() {
            while let Some(nxt) = self.nodes[x].next[level] {
                if self.key_cmp(nxt, &key) == Ordering::Less {
                    x = nxt;
                } else {
                    break;
                }
            }
            prev[level] = x;
        }

        let node_height = self.random_height();
        if node_height > self.height {
            for slot in prev.iter_mut().take(node_height).skip(self.height) {
                *slot = 0;
            }
            self.height = node_height;
        }

        self.size_bytes += key.len() + value.len();
        self.len += 1;
        let new_index = self.nodes.len();
        let mut next = Vec::with_capacity(node_height);
        for (level, &p) in prev.iter().enumerate().take(node_height) {
            next.push(self.nodes[p].next[level]);
        }
        self.nodes.push(SkipNode { key, value, next });
        for (level, &p) in prev.iter().enumerate().take(node_height) {
            self.nodes[p].next[level] = Some(new_index);
        }
    }

    /// Coin-flip level assignment, capped at MAX_HEIGHT.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }

    /// Rightmost node with key < target, or None if no such node.
    fn find_less_than_node(&self, target: &[u8]) -> Option<usize> {
        let mut x = 0usize;
        for level in (0..self.height).rev() {
            while let Some(nxt) = self.nodes[x].next[level] {
                if self.key_cmp(nxt, target) == Ordering::Less {
                    x = nxt;
                } else {
                    break;
                }
            }
        }
        (x != 0).then_some(x)
    }

    /// Leftmost node with key >= target (or > target when `strict`).
    fn find_greater_or_equal_node(&self, target: &[u8], strict: bool) -> Option<usize> {
        let mut x = 0usize;
        for level in (0..self.height).rev() {
            while let Some(nxt) = self.nodes[x].next[level] {
                let ord = self.key_cmp(nxt, target);
                if ord == Ordering::Less || (strict && ord == Ordering::Equal) {
                    x = nxt;
                } else {
                    break;
                }
            }
        }
        self.nodes[x].next[0]
    }

    fn entry(&self, node: usize) -> (&[u8], &[u8]) {
        let n = &self.nodes[node];
        (&n.key, &n.value)
    }

    /// First entry with key >= target.
    pub fn seek(&self, target: &[u8]) -> Option<(&[u8], &[u8])> {
        self.find_greater_or_equal_node(target, false)
            .map(|n| self.entry(n))
    }

    /// First entry with key strictly > target.
    pub fn seek_after(&self, target: &[u8]) -> Option<(&[u8], &[u8])> {
        self.find_greater_or_equal_node(target, true)
            .map(|n| self.entry(n))
    }

    /// Last entry with key strictly < target.
    pub fn seek_before(&self, target: &[u8]) -> Option<(&[u8], &[u8])> {
        self.find_less_than_node(target).map(|n| self.entry(n))
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(&[u8], &[u8])> {
        self.nodes[0].next[0].map(|n| self.entry(n))
    }

    /// Largest entry.
    pub fn last(&self) -> Option<(&[u8], &[u8])> {
        let mut x = 0usize;
        for level in (0..self.height).rev() {
            while let Some(nxt) = self.nodes[x].next[level] {
                x = nxt;
            }
        }
        (x != 0).then(|| self.entry(x))
    }
}
