//! Checksum-tree coverage (§4.5's `SOME_CSUM_MISSING`/`ODD_CSUM_ITEM`):
//! every on-disk (non-hole, non-inline) file extent must be backed by a
//! contiguous, well-formed run of `EXTENT_CSUM` entries covering its full
//! physical byte range. Built once from a single csum-tree walk, then
//! queried per file extent as C5 walks each fs tree.

use std::collections::BTreeMap;

use crate::btrfs::types::{ItemType, Key};

/// One physical byte range covered by `EXTENT_CSUM` items, keyed by the
/// item's starting `bytenr`. `well_formed` is false when the item's raw
/// byte length isn't a whole multiple of the filesystem's checksum size,
/// in which case its true coverage can't be computed and is recorded as
/// zero-length — a query straddling it reports missing coverage, not a
/// false "covered".
#[derive(Debug, Default)]
pub struct CsumCoverage {
    ranges: BTreeMap<u64, (u64, bool)>,
}

impl CsumCoverage {
    pub fn build(items: &[(Key, Vec<u8>)], sectorsize: u32, csum_size: usize) -> Self {
        let mut ranges = BTreeMap::new();
        for (key, data) in items {
            if ItemType::from_u8(key.item_type) != Some(ItemType::ExtentCsum) {
                continue;
            }
            let well_formed = csum_size != 0 && data.len() % csum_size == 0;
            let covered = if well_formed { (data.len() / csum_size) as u64 * sectorsize as u64 } else { 0 };
            ranges.insert(key.offset, (covered, well_formed));
        }
        CsumCoverage { ranges }
    }

    /// Whether `[start, start+len)` is fully covered by one or more
    /// contiguous, well-formed csum items with no gaps.
    pub fn fully_covers(&self, start: u64, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        let end = start + len;
        let mut cursor = start;
        loop {
            let Some((&item_start, &(item_len, well_formed))) = self.ranges.range(..=cursor).next_back() else {
                return false;
            };
            if !well_formed || item_start + item_len <= cursor {
                return false;
            }
            cursor = item_start + item_len;
            if cursor >= end {
                return true;
            }
        }
    }

    /// Whether any malformed csum item starts inside `[start, start+len)`.
    pub fn has_odd_item(&self, start: u64, len: u64) -> bool {
        self.ranges.range(start..start + len).any(|(_, &(_, well_formed))| !well_formed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csum_item(n: usize) -> Vec<u8> {
        vec![0u8; n * 4]
    }

    #[test]
    fn single_item_covers_exact_range() {
        let items = vec![(Key::new(7, ItemType::ExtentCsum as u8, 0x1000), csum_item(4))];
        let coverage = CsumCoverage::build(&items, 4096, 4);
        assert!(coverage.fully_covers(0x1000, 4 * 4096));
    }

    #[test]
    fn gap_between_items_is_not_covered() {
        let items = vec![
            (Key::new(7, ItemType::ExtentCsum as u8, 0x1000), csum_item(2)),
            (Key::new(7, ItemType::ExtentCsum as u8, 0x4000), csum_item(2)),
        ];
        let coverage = CsumCoverage::build(&items, 4096, 4);
        assert!(!coverage.fully_covers(0x1000, 4 * 4096));
    }

    #[test]
    fn malformed_item_is_flagged_odd_and_uncovered() {
        let mut data = csum_item(2);
        data.push(0); // one stray byte, not a multiple of csum_size
        let items = vec![(Key::new(7, ItemType::ExtentCsum as u8, 0x1000), data)];
        let coverage = CsumCoverage::build(&items, 4096, 4);
        assert!(coverage.has_odd_item(0x1000, 4096));
        assert!(!coverage.fully_covers(0x1000, 4096));
    }

    #[test]
    fn adjacent_items_combine_into_full_coverage() {
        let items = vec![
            (Key::new(7, ItemType::ExtentCsum as u8, 0x1000), csum_item(2)),
            (Key::new(7, ItemType::ExtentCsum as u8, 0x3000), csum_item(2)),
        ];
        let coverage = CsumCoverage::build(&items, 4096, 4);
        assert!(coverage.fully_covers(0x1000, 4 * 4096));
    }
}
