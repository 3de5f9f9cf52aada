//! Backref node types stored inside an [`super::ExtentRecord`] (§3, §4.4).

/// A backref names either a specific parent tree block (full backref) or
/// the owning root (normal backref).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParentOrRoot {
    Parent(u64),
    Root(u64),
}

/// `tree_backref`: a reference from a metadata (tree-block) extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeBackref {
    pub target: ParentOrRoot,
    pub full_backref: bool,
    pub found_ref: bool,
}

/// `data_backref`: a reference from a regular/prealloc file extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataBackref {
    pub target: ParentOrRoot,
    pub owner: u64,
    pub offset: u64,
    pub disk_bytenr: u64,
    pub bytes: u64,
    pub num_refs: u64,
    pub found_ref: bool,
}

/// Ordering key used by the backref rbtree so duplicate backrefs compare
/// equal: `(is_data, full_backref, parent|root, owner, offset)` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackrefKey {
    pub is_data: bool,
    pub full_backref: bool,
    pub target: ParentOrRoot,
    pub owner: u64,
    pub offset: u64,
}

impl TreeBackref {
    pub fn key(&self) -> BackrefKey {
        BackrefKey {
            is_data: false,
            full_backref: self.full_backref,
            target: self.target,
            owner: 0,
            offset: 0,
        }
    }
}

impl DataBackref {
    pub fn key(&self) -> BackrefKey {
        BackrefKey {
            is_data: true,
            full_backref: false,
            target: self.target,
            owner: self.owner,
            offset: self.offset,
        }
    }
}

/// Backref rbtree for one extent, modeled as two ordered maps (tree vs
/// data) keyed by [`BackrefKey`] so duplicate insertions merge instead of
/// creating parallel entries, exactly like `find_parent_roots`'
/// `rb_search`-then-merge discipline in the original.
#[derive(Debug, Default, Clone)]
pub struct BackrefSet {
    pub tree_refs: std::collections::BTreeMap<BackrefKey, TreeBackref>,
    pub data_refs: std::collections::BTreeMap<BackrefKey, DataBackref>,
}

impl BackrefSet {
    /// Inserts or re-confirms a tree backref. Returns `true` only when
    /// `backref`'s key was not already present — a second call with a
    /// key already in the map is the *same* physical reference claimed
    /// by a different ingestion pass (extent-tree inline ref vs tree-
    /// block sweep) and must not contribute additional weight to the
    /// extent's `refs` count.
    pub fn insert_tree(&mut self, backref: TreeBackref) -> bool {
        use std::collections::btree_map::Entry;
        match self.tree_refs.entry(backref.key()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().found_ref = true;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(TreeBackref { found_ref: true, ..backref });
                true
            }
        }
    }

    /// Inserts or re-confirms a data backref. Returns the amount of new
    /// reference weight this call contributes: `backref.num_refs` for a
    /// newly seen key, `0` for a re-confirmation of one already known
    /// (same rationale as [`Self::insert_tree`]: the extent-tree inline
    /// `EXTENT_DATA_REF` and the fs-tree sweep's `EXTENT_DATA` both claim
    /// the same backref and must count once, not twice).
    pub fn insert_data(&mut self, backref: DataBackref) -> u64 {
        use std::collections::btree_map::Entry;
        match self.data_refs.entry(backref.key()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().found_ref = true;
                0
            }
            Entry::Vacant(slot) => {
                let added = backref.num_refs;
                slot.insert(DataBackref { found_ref: true, ..backref });
                added
            }
        }
    }

    pub fn all_found(&self) -> bool {
        self.tree_refs.values().all(|b| b.found_ref) && self.data_refs.values().all(|b| b.found_ref)
    }

    pub fn total_found_refs(&self) -> u64 {
        let tree: u64 = self.tree_refs.values().filter(|b| b.found_ref).count() as u64;
        let data: u64 = self.data_refs.values().filter(|b| b.found_ref).map(|b| b.num_refs).sum();
        tree + data
    }
}
