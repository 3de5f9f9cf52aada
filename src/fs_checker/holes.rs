//! Per-inode hole tracking (§4.5 "Hole tracking").
//!
//! The original keys its rbtree by `start` descending so inserts merge
//! with both neighbours in O(log N); a `BTreeMap<start, len>` gives the
//! same merge behavior with ordinary ascending order, since we only ever
//! need "the neighbour immediately before/after a point".

use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct HoleTree {
    holes: BTreeMap<u64, u64>,
}

impl HoleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.holes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.holes.iter().map(|(&s, &l)| (s, l))
    }

    /// Add `[start, start+len)`, merging with any adjacent or
    /// overlapping existing hole (§8 property 7: the rbtree must contain
    /// no adjacent-or-overlapping nodes after the operation).
    pub fn add(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut new_start = start;
        let mut new_end = start + len;

        // Merge with predecessor if it touches or overlaps.
        if let Some((&p_start, &p_len)) = self.holes.range(..=new_start).next_back() {
            if p_start + p_len >= new_start {
                new_start = new_start.min(p_start);
                new_end = new_end.max(p_start + p_len);
                self.holes.remove(&p_start);
            }
        }

        // Merge with every successor that touches or overlaps.
        let to_remove: Vec<u64> = self
            .holes
            .range(new_start..)
            .take_while(|(&s, _)| s <= new_end)
            .map(|(&s, _)| s)
            .collect();
        for s in to_remove {
            if let Some(l) = self.holes.remove(&s) {
                new_end = new_end.max(s + l);
            }
        }

        self.holes.insert(new_start, new_end - new_start);
    }

    /// Remove `[start, start+len)` from the tree, splitting around the
    /// removed region when it falls strictly inside an existing hole.
    pub fn del(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let del_start = start;
        let del_end = start + len;

        let overlapping: Vec<(u64, u64)> = self
            .holes
            .range(..del_end)
            .filter(|(&s, &l)| s + l > del_start)
            .map(|(&s, &l)| (s, l))
            .collect();

        for (s, l) in overlapping {
            self.holes.remove(&s);
            let e = s + l;
            if s < del_start {
                self.holes.insert(s, del_start - s);
            }
            if e > del_end {
                self.holes.insert(del_end, e - del_end);
            }
        }
    }

    /// Whether any hole overlaps `[start, start+len)`.
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        let end = start + len;
        self.holes.range(..end).any(|(&s, &l)| s + l > start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_adjacent_and_overlapping() {
        let mut t = HoleTree::new();
        t.add(100, 50);
        t.add(150, 50); // adjacent
        assert_eq!(t.iter().collect::<Vec<_>>(), vec![(100, 100)]);
        t.add(90, 20); // overlaps the start
        assert_eq!(t.iter().collect::<Vec<_>>(), vec![(90, 110)]);
    }

    #[test]
    fn del_splits_around_removed_region() {
        let mut t = HoleTree::new();
        t.add(0, 1000);
        t.del(100, 50);
        let holes: Vec<_> = t.iter().collect();
        assert_eq!(holes, vec![(0, 100), (150, 850)]);
    }

    #[test]
    fn del_nonexistent_is_noop() {
        let mut t = HoleTree::new();
        t.add(0, 10);
        t.del(100, 10);
        assert_eq!(t.iter().collect::<Vec<_>>(), vec![(0, 10)]);
    }
}
