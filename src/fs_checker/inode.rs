//! Per-inode records and error taxonomies (§4.5, §3).

use bitflags::bitflags;
use std::collections::{BTreeMap, HashSet};

use super::holes::HoleTree;

bitflags! {
    /// Errors attached to one inode (`I_ERR_*` in the original).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InodeErrorBits: u32 {
        const NO_INODE_ITEM      = 1 << 0;
        const DUP_INODE_ITEM     = 1 << 1;
        const NLINK_MISMATCH     = 1 << 2;
        const ISIZE_MISMATCH     = 1 << 3;
        const NBYTES_MISMATCH    = 1 << 4;
        const ORPHAN_FILE_EXTENT = 1 << 5;
        const SOME_CSUM_MISSING  = 1 << 6;
        const UNALIGNED_EXTENT_REC = 1 << 7;
        const FILE_EXTENT_OVERLAP  = 1 << 8;
        const FILE_EXTENT_DISCOUNT = 1 << 9;
        const DIR_ISIZE_MISMATCH   = 1 << 10;
        const FILE_NBYTES_MISMATCH = 1 << 11;
        const ODD_CSUM_ITEM        = 1 << 12;
        const INVALID_IMODE        = 1 << 13;
        const INVALID_GEN          = 1 << 14;
        const NO_ORPHAN_ITEM       = 1 << 15;
    }
}

bitflags! {
    /// Errors attached to one name reference (`REF_ERR_*` in the original).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RefErrorBits: u32 {
        const DUP_INODE_REF   = 1 << 0;
        const DUP_DIR_ITEM    = 1 << 1;
        const DUP_DIR_INDEX   = 1 << 2;
        const ODD_DIR_ITEM    = 1 << 3;
        const ODD_DIR_INDEX   = 1 << 4;
        const INODE_REF_MISSING = 1 << 5;
        const DIR_ITEM_MISSING  = 1 << 6;
        const DIR_INDEX_MISSING = 1 << 7;
        const FILETYPE_MISMATCH = 1 << 8;
        const NAME_TOO_LONG     = 1 << 9;
        const NO_INODE_REF      = 1 << 10;
        const INDEX_UNMATCH     = 1 << 11;
        /// No subvolume names this root as a child via `ROOT_REF`
        /// (checked against the whole root tree, not a single name).
        const NO_ROOT_REF       = 1 << 12;
        /// This root has no `ROOT_BACKREF` pointing back to its parent.
        const NO_ROOT_BACKREF   = 1 << 13;
    }
}

/// One name a directory uses to reach a child, combining whatever subset
/// of `INODE_REF`/`INODE_EXTREF`, `DIR_ITEM` and `DIR_INDEX` were found
/// for it — the ternary check in §4.5 compares these three directly
/// instead of walking each tree separately three times.
#[derive(Debug, Clone, Default)]
pub struct NameRef {
    pub name: Vec<u8>,
    pub index: Option<u64>,
    pub has_inode_ref: bool,
    pub has_dir_item: bool,
    pub has_dir_index: bool,
    pub filetype_from_dir_item: Option<u8>,
    pub errors: RefErrorBits,
}

impl NameRef {
    /// Resolve the ternary check: a name is only fully linked when all
    /// three references agree it exists (§4.5 "ternary check").
    pub fn reconcile(&mut self) {
        if !self.has_inode_ref {
            self.errors |= RefErrorBits::INODE_REF_MISSING;
        }
        if !self.has_dir_item {
            self.errors |= RefErrorBits::DIR_ITEM_MISSING;
        }
        if !self.has_dir_index {
            self.errors |= RefErrorBits::DIR_INDEX_MISSING;
        }
    }

    pub fn is_fully_linked(&self) -> bool {
        self.has_inode_ref && self.has_dir_item && self.has_dir_index
    }
}

/// One inode's accumulated state across a single fs-tree scan.
#[derive(Debug, Default)]
pub struct InodeRecord {
    pub objectid: u64,
    pub found_inode_item: bool,
    pub nlink_item: u32,
    pub nlink_found: u32,
    pub isize_item: u64,
    pub isize_computed: u64,
    pub nbytes_item: u64,
    pub nbytes_computed: u64,
    pub is_dir: bool,
    pub generation: u64,
    pub names: Vec<NameRef>,
    pub holes: HoleTree,
    pub errors: InodeErrorBits,
}

impl InodeRecord {
    pub fn new(objectid: u64) -> Self {
        InodeRecord { objectid, ..Default::default() }
    }

    /// Apply the size/nlink/nbytes comparisons once every item for this
    /// inode has been observed (§4.5 "Key algorithms").
    pub fn finish(&mut self) {
        if !self.found_inode_item {
            self.errors |= InodeErrorBits::NO_INODE_ITEM;
            return;
        }
        if self.nlink_item != self.nlink_found {
            self.errors |= InodeErrorBits::NLINK_MISMATCH;
        }
        if self.nbytes_item != self.nbytes_computed {
            self.errors |= InodeErrorBits::NBYTES_MISMATCH;
        }
        if self.is_dir {
            if self.isize_item != self.isize_computed {
                self.errors |= InodeErrorBits::DIR_ISIZE_MISMATCH;
            }
        } else if !self.holes.is_empty() {
            self.errors |= InodeErrorBits::FILE_EXTENT_DISCOUNT;
        }
        for name in &mut self.names {
            name.reconcile();
        }
    }

    pub fn repaired_nlink(&self) -> u32 {
        self.nlink_found
    }
}

/// btrfs's directory name hash: crc32c seeded with `~1`, truncated to 32
/// bits (`btrfs_name_hash` in the original), used as the `DIR_ITEM` key
/// offset.
pub fn dir_name_hash(name: &[u8]) -> u64 {
    let crc = crc32c::crc32c_append(!1u32, name);
    crc as u64
}

/// Registry of every inode touched during a scan, keyed by objectid.
#[derive(Debug, Default)]
pub struct InodeTable {
    inodes: BTreeMap<u64, InodeRecord>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, objectid: u64) -> &mut InodeRecord {
        self.inodes.entry(objectid).or_insert_with(|| InodeRecord::new(objectid))
    }

    pub fn get(&self, objectid: u64) -> Option<&InodeRecord> {
        self.inodes.get(&objectid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &InodeRecord)> {
        self.inodes.iter()
    }

    pub fn finish_all(&mut self) {
        for rec in self.inodes.values_mut() {
            rec.finish();
        }
    }

    /// An unlinked inode (`nlink_found == 0`) pending a final truncate
    /// must have a matching `ORPHAN_ITEM`; without one it's an inode the
    /// kernel will never finish tearing down (§4.5 orphan accounting).
    /// Call before [`Self::finish_all`] so `NO_ORPHAN_ITEM` participates
    /// in the same error set the rest of `finish` builds.
    pub fn check_orphans(&mut self, orphans: &HashSet<u64>) {
        for rec in self.inodes.values_mut() {
            if rec.found_inode_item && rec.nlink_found == 0 && !orphans.contains(&rec.objectid) {
                rec.errors |= InodeErrorBits::NO_ORPHAN_ITEM;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_inode_item_sets_no_inode_item() {
        let mut rec = InodeRecord::new(256);
        rec.nlink_found = 1;
        rec.finish();
        assert!(rec.errors.contains(InodeErrorBits::NO_INODE_ITEM));
    }

    #[test]
    fn nlink_mismatch_detected() {
        let mut rec = InodeRecord::new(256);
        rec.found_inode_item = true;
        rec.nlink_item = 2;
        rec.nlink_found = 1;
        rec.finish();
        assert!(rec.errors.contains(InodeErrorBits::NLINK_MISMATCH));
    }

    #[test]
    fn ternary_check_flags_missing_dir_index() {
        let mut name = NameRef { name: b"foo".to_vec(), has_inode_ref: true, has_dir_item: true, ..Default::default() };
        name.reconcile();
        assert!(!name.is_fully_linked());
        assert!(name.errors.contains(RefErrorBits::DIR_INDEX_MISSING));
    }

    #[test]
    fn dir_name_hash_is_stable() {
        assert_eq!(dir_name_hash(b"foo"), dir_name_hash(b"foo"));
        assert_ne!(dir_name_hash(b"foo"), dir_name_hash(b"bar"));
    }

    #[test]
    fn unlinked_inode_without_orphan_item_is_flagged() {
        let mut table = InodeTable::new();
        let rec = table.entry(300);
        rec.found_inode_item = true;
        rec.nlink_found = 0;
        table.check_orphans(&HashSet::new());
        assert!(table.get(300).unwrap().errors.contains(InodeErrorBits::NO_ORPHAN_ITEM));
    }

    #[test]
    fn unlinked_inode_with_orphan_item_is_clean() {
        let mut table = InodeTable::new();
        let rec = table.entry(300);
        rec.found_inode_item = true;
        rec.nlink_found = 0;
        let orphans = HashSet::from([300u64]);
        table.check_orphans(&orphans);
        assert!(!table.get(300).unwrap().errors.contains(InodeErrorBits::NO_ORPHAN_ITEM));
    }
}
