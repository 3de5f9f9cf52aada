//! C4: Extent graph & checker (§4.4).

pub mod backref;
pub mod classify;

use crate::btrfs::format::ExtentItem;
use crate::btrfs::types::extent_flags;
use crate::cache::ExtentCache;
use crate::error::FsckError;
use crate::session::Session;

pub use backref::{BackrefKey, BackrefSet, DataBackref, ParentOrRoot, TreeBackref};
pub use classify::{ExtentErrorBits, classify_extent};

/// One `EXTENT_ITEM`/`METADATA_ITEM`, keyed by `(start, len)` in the
/// extent cache.
#[derive(Debug, Clone)]
pub struct ExtentRecord {
    pub start: u64,
    pub nr: u64,
    pub max_size: u64,
    pub extent_item_refs: u64,
    pub refs: u64,
    pub metadata: bool,
    pub is_root: bool,
    pub content_checked: bool,
    pub owner_ref_checked: bool,
    pub wrong_chunk_type: bool,
    pub crossing_stripes: bool,
    pub num_duplicates: u32,
    pub backrefs: BackrefSet,
}

impl ExtentRecord {
    fn new(start: u64, nr: u64, metadata: bool) -> Self {
        ExtentRecord {
            start,
            nr,
            max_size: nr,
            extent_item_refs: 0,
            refs: 0,
            metadata,
            is_root: false,
            content_checked: false,
            owner_ref_checked: false,
            wrong_chunk_type: false,
            crossing_stripes: false,
            num_duplicates: 0,
            backrefs: BackrefSet::default(),
        }
    }
}

/// Owns every extent record discovered during the extent-tree scan and
/// the subsequent tree-block sweep (§4.4 steps 1–2).
#[derive(Default)]
pub struct ExtentGraph {
    extents: ExtentCache<ExtentRecord>,
}

impl ExtentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, start: u64, len: u64) -> Option<&ExtentRecord> {
        self.extents.lookup(start, len).map(|(_, _, r)| r)
    }

    pub fn get_mut(&mut self, start: u64, len: u64) -> Option<&mut ExtentRecord> {
        self.extents.lookup_mut(start, len).map(|(_, _, r)| r)
    }

    /// Drop a record entirely, used by repair once its duplicates (or the
    /// record itself) have been resolved.
    pub fn remove(&mut self, start: u64) -> Option<ExtentRecord> {
        self.extents.remove(start)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, &ExtentRecord)> {
        self.extents.iter()
    }

    /// Step 1: ingest one `EXTENT_ITEM`/`METADATA_ITEM`. Overlapping but
    /// distinct items are tracked as duplicates (priority repair class)
    /// rather than rejected outright, since the original's checker must
    /// continue past them to report `DuplicateExtent`.
    pub fn process_extent_item(
        &mut self,
        start: u64,
        len: u64,
        item: &ExtentItem,
        metadata: bool,
    ) -> Result<(), FsckError> {
        match self.extents.lookup(start, len) {
            Some((existing_start, existing_len, _)) if existing_start == start && existing_len == len => {
                // Same (start, len) seen twice: truly duplicate key, merge.
                if let Some((_, _, rec)) = self.extents.lookup_mut(start, len) {
                    rec.extent_item_refs += item.refs.get();
                }
            }
            Some(_) => {
                // Overlapping but distinct range: record against the
                // larger-covering record and bump num_duplicates on
                // both; the repair strategy later keeps whichever
                // record spans all duplicates (§4.7).
                if let Some((ex_start, ex_len, rec)) = self.extents.lookup_mut(start, len) {
                    rec.num_duplicates += 1;
                    let covers_all = ex_start <= start && ex_start + ex_len >= start + len;
                    if !covers_all {
                        let new_start = ex_start.min(start);
                        let new_end = (ex_start + ex_len).max(start + len);
                        rec.max_size = new_end - new_start;
                    }
                }
            }
            None => {
                let mut record = ExtentRecord::new(start, len, metadata);
                record.extent_item_refs = item.refs.get();
                self.extents.insert(start, len, record)?;
            }
        }
        Ok(())
    }

    /// Step 2 helper: record a reference found while sweeping a tree
    /// root. `full_backref` follows the rule in §4.4: the header's
    /// `RELOC` flag is set, or the block's owner differs from the root
    /// that reached it (cleared again if the block's generation exceeds
    /// the root's `last_snapshot` and the owner matches a non-reloc
    /// root).
    pub fn record_tree_backref(
        &mut self,
        bytenr: u64,
        nodesize: u64,
        target: ParentOrRoot,
        full_backref: bool,
    ) {
        if let Some((_, _, rec)) = self.extents.lookup_mut(bytenr, nodesize) {
            if rec.backrefs.insert_tree(TreeBackref { target, full_backref, found_ref: true }) {
                rec.refs += 1;
            }
            rec.owner_ref_checked = true;
        }
    }

    pub fn record_data_backref(
        &mut self,
        disk_bytenr: u64,
        bytes: u64,
        target: ParentOrRoot,
        owner: u64,
        offset: u64,
    ) {
        if let Some((_, _, rec)) = self.extents.lookup_mut(disk_bytenr, bytes) {
            let added = rec.backrefs.insert_data(DataBackref {
                target,
                owner,
                offset,
                disk_bytenr,
                bytes,
                num_refs: 1,
                found_ref: true,
            });
            rec.refs += added;
        }
    }

    pub fn mark_content_checked(&mut self, bytenr: u64, nodesize: u64) {
        if let Some((_, _, rec)) = self.extents.lookup_mut(bytenr, nodesize) {
            rec.content_checked = true;
        }
    }

    pub fn mark_chunk_type(&mut self, start: u64, len: u64, wrong: bool) {
        if let Some((_, _, rec)) = self.extents.lookup_mut(start, len) {
            rec.wrong_chunk_type = wrong;
        }
    }

    pub fn mark_crossing_stripes(&mut self, start: u64, len: u64, crossing: bool) {
        if let Some((_, _, rec)) = self.extents.lookup_mut(start, len) {
            rec.crossing_stripes = crossing;
        }
    }

    /// Step 3: classify every record, returning `(start, len, bits)`
    /// triples for any record with a nonzero bitmask. Publishes error
    /// counts to `session`.
    pub fn classify_all(&self, session: &Session) -> Vec<(u64, u64, ExtentErrorBits)> {
        let mut out = Vec::new();
        for (start, len, rec) in self.extents.iter() {
            let bits = classify_extent(rec);
            if !bits.is_empty() {
                session.record_error_found();
                log::debug!("extent {start}+{len}: {bits:?}");
                out.push((start, len, bits));
            }
        }
        out
    }

    /// Step 4 (repair only): find the plurality `(bytenr, bytes)` tuple
    /// across all data backrefs of an extent — the value file-extent
    /// items should agree on.
    pub fn plurality_target(&self, start: u64, len: u64) -> Option<(u64, u64)> {
        let rec = self.get(start, len)?;
        let mut counts: std::collections::HashMap<(u64, u64), u64> = std::collections::HashMap::new();
        for backref in rec.backrefs.data_refs.values() {
            *counts.entry((backref.disk_bytenr, backref.bytes)).or_insert(0) += backref.num_refs;
        }
        counts.into_iter().max_by_key(|(_, count)| *count).map(|(k, _)| k)
    }

    /// Whether DATA is allowed as an extent type per §4.4's "Inline data
    /// under `EXTENT_DATA_INLINE` does NOT create an extent_record
    /// reference" rule — exposed so C5's file-extent walker can skip
    /// inline extents when feeding C4.
    pub fn is_referencing_extent_type(flags: u64) -> bool {
        flags & (extent_flags::DATA | extent_flags::TREE_BLOCK) != 0
    }
}
