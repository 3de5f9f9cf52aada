//! Extent-record classification (§4.4 step 3).

use bitflags::bitflags;

bitflags! {
    /// Error bits set on an [`super::ExtentRecord`] by
    /// [`classify_extent`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtentErrorBits: u32 {
        const REF_COUNT_MISMATCH = 1 << 0;
        const MISSING_BACKREF    = 1 << 1;
        const DUPLICATE_EXTENT   = 1 << 2;
        const OWNER_LOST         = 1 << 3;
        const WRONG_CHUNK_TYPE   = 1 << 4;
        const CROSSING_STRIPES   = 1 << 5;
    }
}

/// Apply the §4.4 step-3 rules to one extent record, returning the set
/// bits. Does not mutate the record; callers decide whether/when to
/// store the result.
pub fn classify_extent(record: &super::ExtentRecord) -> ExtentErrorBits {
    let mut bits = ExtentErrorBits::empty();

    if record.refs != record.extent_item_refs {
        bits |= ExtentErrorBits::REF_COUNT_MISMATCH;
    }
    if !record.backrefs.all_found() {
        bits |= ExtentErrorBits::MISSING_BACKREF;
    }
    if record.num_duplicates > 0 {
        bits |= ExtentErrorBits::DUPLICATE_EXTENT;
    }
    if !record.owner_ref_checked {
        bits |= ExtentErrorBits::OWNER_LOST;
    }
    if record.wrong_chunk_type {
        bits |= ExtentErrorBits::WRONG_CHUNK_TYPE;
    }
    if record.crossing_stripes {
        bits |= ExtentErrorBits::CROSSING_STRIPES;
    }

    bits
}
