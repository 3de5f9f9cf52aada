//! Subvolume root linkage (§4.5): every subvolume other than the default
//! fs tree must be named as a child by some parent's `ROOT_REF` and must
//! carry the matching `ROOT_BACKREF` pointing back. Both item kinds live
//! in the root tree alongside the `ROOT_ITEM`s `discover_roots` already
//! walks, so this reuses that same item list instead of a second tree
//! walk.

use std::collections::HashMap;

use zerocopy::FromBytes;

use crate::btrfs::format::RootRef;
use crate::btrfs::types::{FS_TREE_OBJECTID, ItemType, Key};

use super::inode::RefErrorBits;

/// Parent/child edges read from one root tree's `ROOT_REF`/`ROOT_BACKREF`
/// items, indexed by child root id for O(1) lookup during [`Self::check`].
#[derive(Debug, Default)]
pub struct RootLinks {
    refs_by_child: HashMap<u64, Vec<u64>>,
    backrefs_by_child: HashMap<u64, Vec<u64>>,
}

impl RootLinks {
    pub fn collect(items: &[(Key, Vec<u8>)]) -> Self {
        let mut refs_by_child: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut backrefs_by_child: HashMap<u64, Vec<u64>> = HashMap::new();
        for (key, data) in items {
            match ItemType::from_u8(key.item_type) {
                Some(ItemType::RootRef) if RootRef::ref_from_prefix(data.as_slice()).is_ok() => {
                    // key = (parent, ROOT_REF, child)
                    refs_by_child.entry(key.offset).or_default().push(key.objectid);
                }
                Some(ItemType::RootBackref) if RootRef::ref_from_prefix(data.as_slice()).is_ok() => {
                    // key = (child, ROOT_BACKREF, parent)
                    backrefs_by_child.entry(key.objectid).or_default().push(key.offset);
                }
                _ => {}
            }
        }
        RootLinks { refs_by_child, backrefs_by_child }
    }

    /// Check each subvolume id for a symmetric `ROOT_REF`/`ROOT_BACKREF`
    /// pair. `FS_TREE_OBJECTID` is skipped: it's the default subvolume and
    /// has no parent to link from.
    pub fn check(&self, subvol_ids: impl IntoIterator<Item = u64>) -> Vec<(u64, RefErrorBits)> {
        let mut out = Vec::new();
        for id in subvol_ids {
            if id == FS_TREE_OBJECTID {
                continue;
            }
            let mut bits = RefErrorBits::empty();
            if !self.refs_by_child.contains_key(&id) {
                bits |= RefErrorBits::NO_ROOT_REF;
            }
            if !self.backrefs_by_child.contains_key(&id) {
                bits |= RefErrorBits::NO_ROOT_BACKREF;
            }
            if !bits.is_empty() {
                out.push((id, bits));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_ref_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u64.to_le_bytes()); // dirid
        buf.extend_from_slice(&0u64.to_le_bytes()); // sequence
        buf.extend_from_slice(&0u16.to_le_bytes()); // name_len
        buf
    }

    #[test]
    fn symmetric_link_is_clean() {
        let items = vec![
            (Key::new(5, ItemType::RootRef as u8, 256), root_ref_bytes()),
            (Key::new(256, ItemType::RootBackref as u8, 5), root_ref_bytes()),
        ];
        let links = RootLinks::collect(&items);
        assert!(links.check([256u64]).is_empty());
    }

    #[test]
    fn missing_backref_is_flagged() {
        let items = vec![(Key::new(5, ItemType::RootRef as u8, 256), root_ref_bytes())];
        let links = RootLinks::collect(&items);
        let errors = links.check([256u64]);
        assert_eq!(errors, vec![(256, RefErrorBits::NO_ROOT_BACKREF)]);
    }

    #[test]
    fn missing_both_is_flagged() {
        let links = RootLinks::collect(&[]);
        let errors = links.check([999u64]);
        assert_eq!(errors, vec![(999, RefErrorBits::NO_ROOT_REF | RefErrorBits::NO_ROOT_BACKREF)]);
    }

    #[test]
    fn default_fs_tree_is_never_checked() {
        let links = RootLinks::collect(&[]);
        assert!(links.check([FS_TREE_OBJECTID]).is_empty());
    }
}
