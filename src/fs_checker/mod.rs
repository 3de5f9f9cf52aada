//! C5: Fs-tree checker (§4.5).
//!
//! Walks one subvolume's fs tree leaf by leaf, building an [`InodeTable`]
//! from `INODE_ITEM`/`INODE_REF`/`INODE_EXTREF`/`DIR_ITEM`/`DIR_INDEX`/
//! `EXTENT_DATA` items, then classifies every inode. [`original_mode`]
//! and [`lowmem_mode`] differ only in how much of the tree they hold in
//! memory while doing it; both call into [`inode`] for the actual
//! per-item accounting so they agree bit-for-bit (§8 "Mode equivalence").

pub mod csum;
pub mod holes;
pub mod inode;
pub mod lowmem_mode;
pub mod original_mode;
pub mod root_links;

use std::collections::HashSet;

use zerocopy::FromBytes;

use crate::btrfs::format::{
    DirItem as DiskDirItem, FileExtentItem, InodeExtref as DiskInodeExtref, InodeItem as DiskInodeItem,
    InodeRef as DiskInodeRef,
};
use crate::btrfs::types::{FILE_EXTENT_INLINE, FILE_EXTENT_INLINE_HEADER_SIZE, ItemType, Key, ORPHAN_OBJECTID};
use crate::error::FsckError;
use crate::extent_graph::ExtentGraph;
use crate::session::Session;
use crate::tree::{BlockSource, Path, TreeBlock, TreeReader, path};

pub use csum::CsumCoverage;
pub use inode::{InodeErrorBits, InodeRecord, InodeTable, NameRef, RefErrorBits, dir_name_hash};
pub use root_links::RootLinks;

/// Result of checking one fs tree.
#[derive(Debug, Default)]
pub struct FsTreeReport {
    pub inodes_checked: u64,
    pub inode_errors: Vec<(u64, InodeErrorBits)>,
    pub ref_errors: Vec<(u64, Vec<u8>, RefErrorBits)>,
}

/// Walk every leaf of `root_bytenr`'s fs tree, feeding items into
/// `table` and, when present, recording data backrefs into
/// `extent_graph` (§4.4/§4.5 cross-reference). `csum` is only consulted
/// when `--check-data-csum` is requested; without it every file extent's
/// checksum coverage is left unverified rather than reported missing.
pub fn scan_fs_tree<B: BlockSource>(
    reader: &mut TreeReader<B>,
    root_bytenr: u64,
    root_id: u64,
    table: &mut InodeTable,
    extent_graph: Option<&mut ExtentGraph>,
    csum: Option<&CsumCoverage>,
    session: &Session,
) -> Result<(), FsckError> {
    let mut extent_graph = extent_graph;
    let mut orphans = HashSet::new();
    let mut cur = path::search_slot(reader, root_bytenr, Key::floor(0), false)?;

    loop {
        if session.is_cancelled() {
            return Err(FsckError::Again);
        }
        let Some(block) = cur.leaf() else { break };
        scan_leaf(block, root_id, table, extent_graph.as_deref_mut(), csum, &mut orphans)?;

        match path::next_leaf(reader, &cur)? {
            Some(next) => cur = next,
            None => break,
        }
    }

    table.check_orphans(&orphans);
    table.finish_all();
    Ok(())
}

fn scan_leaf(
    block: &TreeBlock,
    root_id: u64,
    table: &mut InodeTable,
    mut extent_graph: Option<&mut ExtentGraph>,
    csum: Option<&CsumCoverage>,
    orphans: &mut HashSet<u64>,
) -> Result<(), FsckError> {
    for i in 0..block.nritems() {
        let key = block.item_key(i).ok_or(FsckError::Corrupt("leaf item missing key"))?;
        let Some(item_type) = ItemType::from_u8(key.item_type) else { continue };
        let Some(data) = block.item_data(i) else { continue };

        match item_type {
            ItemType::InodeItem => {
                let Ok((disk, _)) = DiskInodeItem::ref_from_prefix(data) else { continue };
                let rec = table.entry(key.objectid);
                if rec.found_inode_item {
                    rec.errors |= InodeErrorBits::DUP_INODE_ITEM;
                }
                rec.found_inode_item = true;
                rec.nlink_item = disk.nlink.get();
                rec.isize_item = disk.size.get();
                rec.nbytes_item = disk.nbytes.get();
                rec.generation = disk.generation.get();
                rec.is_dir = (disk.mode.get() & 0o170000) == 0o040000;
            }
            ItemType::InodeRef => {
                // Key is (child objectid, INODE_REF, parent directory
                // objectid): the child gains a link, the parent directory
                // gains a name to reconcile against its DIR_ITEM/DIR_INDEX.
                let Ok((hdr, rest)) = DiskInodeRef::ref_from_prefix(data) else { continue };
                let name_len = hdr.name_len.get() as usize;
                let name = rest.get(..name_len).unwrap_or_default().to_vec();
                let child = key.objectid;
                let parent_dir = key.offset;
                table.entry(child).nlink_found += 1;
                let dir_rec = table.entry(parent_dir);
                name_ref_mut(dir_rec, &name, Some(hdr.index.get())).has_inode_ref = true;
            }
            ItemType::InodeExtref => {
                // Key is (child objectid, INODE_EXTREF, hash(name) XOR
                // parent); the parent directory objectid lives in the
                // item body itself rather than the key.
                let Ok((hdr, rest)) = DiskInodeExtref::ref_from_prefix(data) else { continue };
                let name_len = hdr.name_len.get() as usize;
                let name = rest.get(..name_len).unwrap_or_default().to_vec();
                let child = key.objectid;
                let parent_dir = hdr.parent_objectid.get();
                table.entry(child).nlink_found += 1;
                let dir_rec = table.entry(parent_dir);
                name_ref_mut(dir_rec, &name, Some(hdr.index.get())).has_inode_ref = true;
            }
            ItemType::DirItem | ItemType::DirIndex => {
                let Ok((hdr, rest)) = DiskDirItem::ref_from_prefix(data) else { continue };
                let name_len = hdr.name_len.get() as usize;
                let name = rest.get(..name_len).unwrap_or_default().to_vec();
                let dir_objectid = key.objectid;
                let child = hdr.location.to_key().objectid;
                let rec = table.entry(dir_objectid);
                let index = if item_type == ItemType::DirIndex { Some(key.offset) } else { None };
                let nref = name_ref_mut(rec, &name, index);
                if item_type == ItemType::DirItem {
                    nref.has_dir_item = true;
                } else {
                    nref.has_dir_index = true;
                }
                nref.filetype_from_dir_item = Some(hdr.file_type);
                let _ = child;
            }
            ItemType::ExtentData => {
                let Ok((fe, _)) = FileExtentItem::ref_from_prefix(data) else { continue };
                let rec = table.entry(key.objectid);
                let logical_start = key.offset;
                if fe.extent_type == FILE_EXTENT_INLINE {
                    let inline_len = data.len().saturating_sub(FILE_EXTENT_INLINE_HEADER_SIZE) as u64;
                    rec.isize_computed = rec.isize_computed.max(logical_start + inline_len);
                } else {
                    let num_bytes = fe.num_bytes.get();
                    rec.isize_computed = rec.isize_computed.max(logical_start + num_bytes);
                    rec.nbytes_computed += fe.disk_num_bytes.get().max(num_bytes);
                    if fe.disk_bytenr.get() != 0 {
                        if let Some(graph) = extent_graph.as_deref_mut() {
                            graph.record_data_backref(
                                fe.disk_bytenr.get(),
                                fe.disk_num_bytes.get(),
                                crate::extent_graph::ParentOrRoot::Root(root_id),
                                key.objectid,
                                logical_start,
                            );
                        }
                        if let Some(coverage) = csum {
                            let disk_bytenr = fe.disk_bytenr.get();
                            let disk_len = fe.disk_num_bytes.get();
                            if coverage.has_odd_item(disk_bytenr, disk_len) {
                                rec.errors |= InodeErrorBits::ODD_CSUM_ITEM;
                            } else if !coverage.fully_covers(disk_bytenr, disk_len) {
                                rec.errors |= InodeErrorBits::SOME_CSUM_MISSING;
                            }
                        }
                    }
                }
            }
            ItemType::OrphanItem => {
                // Key is (ORPHAN_OBJECTID, ORPHAN_ITEM, pending inode
                // objectid); the item carries no body.
                if key.objectid == ORPHAN_OBJECTID {
                    orphans.insert(key.offset);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn name_ref_mut<'a>(rec: &'a mut InodeRecord, name: &[u8], index: Option<u64>) -> &'a mut NameRef {
    if let Some(pos) = rec.names.iter().position(|n| n.name == name) {
        return &mut rec.names[pos];
    }
    rec.names.push(NameRef { name: name.to_vec(), index, ..Default::default() });
    rec.names.last_mut().expect("just pushed")
}

/// Pull every classified error out of a finished [`InodeTable`].
pub fn collect_report(table: &InodeTable) -> FsTreeReport {
    let mut report = FsTreeReport::default();
    for (objectid, rec) in table.iter() {
        report.inodes_checked += 1;
        if !rec.errors.is_empty() {
            report.inode_errors.push((*objectid, rec.errors));
        }
        for name in &rec.names {
            if !name.errors.is_empty() {
                report.ref_errors.push((*objectid, name.name.clone(), name.errors));
            }
        }
    }
    report
}

// Re-exported so downstream (repair, api) doesn't need to know this is a
// `tree::Path` under the hood.
pub type FsTreePath = Path;
