use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::iterator::StorageIterator;

/// Traversal direction of a merging cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for range scans across memtable + all table levels, and for
/// compaction (merging tables). Children are ordered by recency: index 0
/// is the newest source (active memtable), higher indices are older, and
/// the tie-break on equal keys always favors the newer source.
///
/// A binary heap of child indices, keyed by each child's current head
/// under the internal-key ordering, picks the next entry. The heap is a
/// min-heap while moving forward and a max-heap while moving backward;
/// a direction change repositions every child around the current key and
/// rebuilds the heap — the subtle part, covered by the direction-reversal
/// tests.
pub struct MergeIterator {
    icmp: InternalKeyComparator,
    children: Vec<Box<dyn StorageIterator>>,
    /// Indices of currently-valid children, heap-ordered; heap[0] is the
    /// current entry.
    heap: Vec<usize>,
    direction: Direction,
}

impl MergeIterator {
    /// Create a merging iterator. `children` must be ordered newest
    /// source first.
    pub fn new(icmp: InternalKeyComparator, children: Vec<Box<dyn StorageIterator>>) -> MergeIterator {
        MergeIterator {
            icmp,
            children,
            heap: Vec::new(),
            direction: Direction::Forward,
        }
    }

    /// True when child `a` outranks child `b` for the current direction.
    fn child_outranks(&self, a: usize, b: usize) -> bool {
        let ord = self
            .icmp
            .compare(self.children[a].key(), self.children[b].key());
        match self.direction {
            Direction::Forward => ord.is_lt() || (ord.is_eq() && a < b),
            Direction::Reverse => ord.is_gt() || (ord.is_eq() && a < b),
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.child_outranks(self.heap[pos], self.heap[parent]) {
                self.heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let mut best = pos;
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < self.heap.len() && self.child_outranks(self.heap[child], self.heap[best])
                {
                    best = child;
                }
            }
            if best == pos {
                break;
            }
            self.heap.swap(pos, best);
            pos = best;
        }
    }

    /// Rebuild the heap from every currently-valid child.
    fn rebuild_heap(&mut self) {
        self.heap = (0..self.children.len())
            .filter(|&i| self.children[i].is_valid())
            .collect();
        if self.heap.len() > 1 {
            for pos in (0..self.heap.len() / 2).rev() {
                self.sift_down(pos);
            }
        }
    }

    /// After the top child moved, restore the heap invariant (or drop
    /// the child if it ran off its end).
    fn fix_top(&mut self) {
        let top = self.heap[0];
        if self.children[top].is_valid() {
            self.sift_down(0);
        } else {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
            if !self.heap.is_empty() {
                self.sift_down(0);
            }
        }
    }

    /// Reposition every non-current child for forward traversal from the
    /// current key: at the first entry strictly after it.
    fn switch_to_forward(&mut self) -> Result<()> {
        let current = self.heap[0];
        let key = self.children[current].key().to_vec();
        for i in 0..self.children.len() {
            if i == current {
                continue;
            }
            let child = &mut self.children[i];
            child.seek(&key)?;
            if child.is_valid() && self.icmp.compare(child.key(), &key).is_eq() {
                child.next()?;
            }
        }
        self.direction = Direction::Forward;
        self.rebuild_heap();
        debug_assert_eq!(self.heap.first(), Some(&current));
        Ok(())
    }

    /// Reposition every non-current child for backward traversal from the
    /// current key: at the last entry strictly before it.
    fn switch_to_reverse(&mut self) -> Result<()> {
        let current = self.heap[0];
        let key = self.children[current].key().to_vec();
        for i in 0..self.children.len() {
            if i == current {
                continue;
            }
            let child = &mut self.children[i];
            child.seek(&key)?;
            if child.is_valid() {
                child.prev()?;
            } else {
                child.seek_to_last()?;
            }
        }
        self.direction = Direction::Reverse;
        self.rebuild_heap();
        debug_assert_eq!(self.heap.first(), Some(&current));
        Ok(())
    }
}

impl StorageIterator for MergeIterator {
    fn is_valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn key(&self) -> &[u8] {
        assert!(self.is_valid(), "iterator not positioned");
        self.children[self.heap[0]].key()
    }

    fn value(&self) -> &[u8] {
        assert!(self.is_valid(), "iterator not positioned");
        self.children[self.heap[0]].value()
    }

    fn next(&mut self) -> Result<()> {
        assert!(self.is_valid(), "iterator not positioned");
        if self.direction != Direction::Forward {
            self.switch_to_forward()?;
        }
        let top = self.heap[0];
        self.children[top].next()?;
        self.fix_top();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        assert!(self.is_valid(), "iterator not positioned");
        if self.direction != Direction::Reverse {
            self.switch_to_reverse()?;
        }
        let top = self.heap[0];
        self.children[top].prev()?;
        self.fix_top();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.direction = Direction::Forward;
        self.rebuild_heap();
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.rebuild_heap();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.rebuild_heap();
        Ok(())
    }
}
