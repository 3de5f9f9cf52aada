//! LOWMEM mode: check one fs tree at a time and discard its
//! [`super::InodeTable`] immediately after classification, re-reading the
//! tree from disk whenever a later pass needs something the first pass
//! didn't keep (§4.5, §8 "Mode equivalence").
//!
//! The accounting in [`super::scan_leaf`] is identical to
//! [`super::original_mode`]'s — only the lifetime of the table differs —
//! so the two modes must agree on every [`super::InodeErrorBits`]/
//! [`super::RefErrorBits`] bit for the same input tree.

use crate::error::FsckError;
use crate::extent_graph::ExtentGraph;
use crate::session::Session;
use crate::tree::{BlockSource, TreeReader};

use super::{CsumCoverage, FsTreeReport, InodeTable, collect_report, scan_fs_tree};

/// Check one `(root_id, root_bytenr)` pair and return only the
/// classified report, dropping the table before returning.
pub fn check_one_root<B: BlockSource>(
    reader: &mut TreeReader<B>,
    root_id: u64,
    root_bytenr: u64,
    extent_graph: Option<&mut ExtentGraph>,
    csum: Option<&CsumCoverage>,
    session: &Session,
) -> Result<FsTreeReport, FsckError> {
    let mut table = InodeTable::new();
    scan_fs_tree(reader, root_bytenr, root_id, &mut table, extent_graph, csum, session)?;
    Ok(collect_report(&table))
}

/// Stream every root's report without ever holding more than one
/// [`InodeTable`] at a time.
pub fn check_all_roots<B: BlockSource>(
    reader: &mut TreeReader<B>,
    roots: &[(u64, u64)],
    mut extent_graph: Option<&mut ExtentGraph>,
    csum: Option<&CsumCoverage>,
    session: &Session,
) -> Result<Vec<(u64, FsTreeReport)>, FsckError> {
    let mut out = Vec::with_capacity(roots.len());
    for &(root_id, root_bytenr) in roots {
        let report = check_one_root(reader, root_id, root_bytenr, extent_graph.as_deref_mut(), csum, session)?;
        out.push((root_id, report));
    }
    Ok(out)
}
