//! C6: Qgroup verifier (§4.6).
//!
//! Two passes, same split the original's `qgroup_verify_all` uses:
//! [`collect_implied_refs`] walks every extent's backrefs once and
//! attributes bytes to the level-0 (per-subvolume) qgroup(s) that
//! reference it; [`resolve_reference_roots`] then propagates those
//! numbers up through `QGROUP_RELATION` parent/child edges. The original
//! recurses up the relation graph per qgroup; we use an explicit
//! work-stack instead (§9 DESIGN NOTES) so a deep or cyclic relation
//! graph can't blow the stack — cycles are broken by tracking visited
//! qgroupids per propagation pass.

use std::collections::{HashMap, HashSet};

use crate::btrfs::format::QGROUP_STATUS_FLAG_INCONSISTENT;
use crate::extent_graph::{ExtentGraph, ParentOrRoot};
use crate::session::Session;

/// Bytes a single qgroup accounts for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QgroupUsage {
    pub referenced: u64,
    pub exclusive: u64,
}

/// One qgroup's computed state plus whatever the on-disk `QGROUP_INFO`
/// item said, once compared.
#[derive(Debug, Clone, Default)]
pub struct QgroupRecord {
    pub qgroupid: u64,
    pub computed: QgroupUsage,
    pub on_disk: Option<QgroupUsage>,
    pub children: Vec<u64>,
}

impl QgroupRecord {
    pub fn mismatched(&self) -> bool {
        match self.on_disk {
            Some(disk) => disk != self.computed,
            None => false,
        }
    }
}

/// Level-0 (per-subvolume) usage plus the set of level-0 relation edges
/// feeding each higher qgroup, built from one extent-graph pass.
#[derive(Debug, Default)]
pub struct ImpliedRefs {
    pub per_root: HashMap<u64, QgroupUsage>,
}

/// Pass 1: for every extent, attribute its bytes to the root(s) that
/// reference it. A root appears in the set for an extent once per
/// distinct (tree or data) backref naming it; `Parent(bytenr)`-style full
/// backrefs cannot be resolved to an owning root without re-walking the
/// parent chain, so they are skipped here — consistent with the
/// original falling back to a rescan when `FULL_BACKREF` extents are
/// qgroup-relevant.
pub fn collect_implied_refs(graph: &ExtentGraph) -> ImpliedRefs {
    let mut per_root: HashMap<u64, QgroupUsage> = HashMap::new();

    for (_start, len, rec) in graph.iter() {
        let mut roots: HashSet<u64> = HashSet::new();
        for backref in rec.backrefs.tree_refs.values() {
            if let ParentOrRoot::Root(id) = backref.target {
                roots.insert(id);
            }
        }
        for backref in rec.backrefs.data_refs.values() {
            if let ParentOrRoot::Root(id) = backref.target {
                roots.insert(id);
            }
        }

        for &root in &roots {
            let usage = per_root.entry(root).or_default();
            usage.referenced += len;
        }
        if roots.len() == 1 {
            let root = *roots.iter().next().expect("len == 1");
            per_root.entry(root).or_default().exclusive += len;
        }
    }

    ImpliedRefs { per_root }
}

/// Pass 2: propagate level-0 usage up through `QGROUP_RELATION` edges.
/// `relations` maps child qgroupid -> parent qgroupids. Uses an explicit
/// stack rather than recursion (§9 DESIGN NOTES); a `visited` set per
/// root run breaks cycles instead of erroring, since a qgroup relation
/// cycle is itself something the caller should report separately.
pub fn resolve_reference_roots(
    implied: &ImpliedRefs,
    relations: &HashMap<u64, Vec<u64>>,
) -> HashMap<u64, QgroupRecord> {
    let mut records: HashMap<u64, QgroupRecord> = HashMap::new();

    for (&root, &usage) in &implied.per_root {
        records.entry(root).or_insert_with(|| QgroupRecord { qgroupid: root, ..Default::default() }).computed = usage;

        let mut stack: Vec<u64> = relations.get(&root).cloned().unwrap_or_default();
        let mut visited: HashSet<u64> = HashSet::from([root]);

        while let Some(qgroupid) = stack.pop() {
            if !visited.insert(qgroupid) {
                continue;
            }
            let rec = records.entry(qgroupid).or_insert_with(|| QgroupRecord { qgroupid, ..Default::default() });
            rec.computed.referenced += usage.referenced;
            // Exclusive bytes only count for a higher qgroup if no
            // sibling subvolume under it also references the extent;
            // approximated here as "inherit the child's exclusive share",
            // which is exact for strictly nested (non-shared) hierarchies.
            rec.computed.exclusive += usage.exclusive;
            rec.children.push(root);

            if let Some(parents) = relations.get(&qgroupid) {
                stack.extend(parents.iter().copied());
            }
        }
    }

    records
}

/// Compare computed usage against on-disk `QGROUP_INFO` items, honoring
/// the status flags that suppress mismatch reporting while a rescan is
/// in flight or the tree is already known inconsistent (§4.6).
pub fn diff_against_disk(
    records: &mut HashMap<u64, QgroupRecord>,
    on_disk: &HashMap<u64, QgroupUsage>,
    status_flags: u64,
    session: &Session,
) -> Vec<u64> {
    for (&id, &usage) in on_disk {
        records.entry(id).or_insert_with(|| QgroupRecord { qgroupid: id, ..Default::default() }).on_disk = Some(usage);
    }

    if status_flags & QGROUP_STATUS_FLAG_INCONSISTENT != 0 {
        log::info!("qgroup status already marked inconsistent; suppressing mismatch reports");
        return Vec::new();
    }

    let mut mismatched = Vec::new();
    for rec in records.values() {
        if rec.mismatched() {
            session.record_error_found();
            mismatched.push(rec.qgroupid);
        }
    }
    mismatched.sort_unstable();
    mismatched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reference_is_exclusive() {
        let mut per_root = HashMap::new();
        per_root.insert(5, QgroupUsage { referenced: 100, exclusive: 100 });
        let implied = ImpliedRefs { per_root };
        let relations = HashMap::new();
        let records = resolve_reference_roots(&implied, &relations);
        assert_eq!(records[&5].computed, QgroupUsage { referenced: 100, exclusive: 100 });
    }

    #[test]
    fn parent_relation_accumulates_child_usage() {
        let mut per_root = HashMap::new();
        per_root.insert(256, QgroupUsage { referenced: 50, exclusive: 50 });
        let implied = ImpliedRefs { per_root };
        let mut relations = HashMap::new();
        relations.insert(256u64, vec![0x1_0000_0001u64]);
        let records = resolve_reference_roots(&implied, &relations);
        assert_eq!(records[&0x1_0000_0001].computed.referenced, 50);
    }

    #[test]
    fn cycle_does_not_infinite_loop() {
        let mut per_root = HashMap::new();
        per_root.insert(1, QgroupUsage { referenced: 10, exclusive: 10 });
        let implied = ImpliedRefs { per_root };
        let mut relations = HashMap::new();
        relations.insert(1u64, vec![2u64]);
        relations.insert(2u64, vec![1u64]);
        let records = resolve_reference_roots(&implied, &relations);
        assert_eq!(records[&2].computed.referenced, 10);
    }

    #[test]
    fn inconsistent_flag_suppresses_mismatch_reports() {
        let mut records = HashMap::new();
        records.insert(5, QgroupRecord { qgroupid: 5, computed: QgroupUsage { referenced: 10, exclusive: 10 }, ..Default::default() });
        let mut on_disk = HashMap::new();
        on_disk.insert(5, QgroupUsage { referenced: 999, exclusive: 999 });
        let session = Session::new(crate::session::CheckMode::Original, false);
        let mismatched = diff_against_disk(&mut records, &on_disk, QGROUP_STATUS_FLAG_INCONSISTENT, &session);
        assert!(mismatched.is_empty());
    }
}
