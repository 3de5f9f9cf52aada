//! ORIGINAL mode: scan every fs tree once, keep every [`super::InodeTable`]
//! in memory simultaneously, then classify (§4.5, §8 "Mode equivalence").

use crate::error::FsckError;
use crate::extent_graph::ExtentGraph;
use crate::session::Session;
use crate::tree::{BlockSource, TreeReader};

use super::{CsumCoverage, FsTreeReport, InodeTable, collect_report, scan_fs_tree};

/// One fs (sub-volume) tree's full report, keyed by root objectid. Keeps
/// the underlying [`InodeTable`] alive so a later pass (e.g. cross-root
/// reachability in C6) can re-query it without rescanning the tree —
/// the whole point of paying the memory cost upfront.
#[derive(Debug, Default)]
pub struct OriginalModeReport {
    pub per_root: Vec<(u64, InodeTable, FsTreeReport)>,
}

/// Check every `(root_id, root_bytenr)` pair, holding every tree's
/// [`InodeTable`] in memory at once — the original's default mode.
pub fn check_all_roots<B: BlockSource>(
    reader: &mut TreeReader<B>,
    roots: &[(u64, u64)],
    mut extent_graph: Option<&mut ExtentGraph>,
    csum: Option<&CsumCoverage>,
    session: &Session,
) -> Result<OriginalModeReport, FsckError> {
    let mut out = OriginalModeReport::default();
    for &(root_id, root_bytenr) in roots {
        let mut table = InodeTable::new();
        scan_fs_tree(reader, root_bytenr, root_id, &mut table, extent_graph.as_deref_mut(), csum, session)?;
        let report = collect_report(&table);
        out.per_root.push((root_id, table, report));
    }
    Ok(out)
}
