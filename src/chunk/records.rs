//! In-memory shadow structures built by C2 (§3's record table), grounded
//! field-for-field in `btrfsck.h`'s `block_group_record` / `device_record`
//! / `device_extent_record` and `volumes.h`'s `btrfs_device`.

use crate::btrfs::types::{BTRFS_STRIPE_LEN, Objectid};

/// One logical chunk: `CHUNK_ITEM` plus its stripe list.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub objectid: Objectid,
    pub logical: u64,
    pub length: u64,
    pub chunk_type: u64,
    pub stripe_len: u64,
    pub num_stripes: u16,
    pub sub_stripes: u16,
    pub stripes: Vec<ChunkStripe>,
    /// Set once a matching `BLOCK_GROUP_ITEM` has been seen, even if it
    /// arrived before this chunk during the tree scan (§4.4 tie-break:
    /// "cross_check_chunks handles chunks that appeared before their
    /// block group").
    pub block_group_seen: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkStripe {
    pub devid: u64,
    pub physical: u64,
}

impl ChunkRecord {
    pub fn is_raid56(&self) -> bool {
        use crate::btrfs::types::block_group_flags::{RAID5, RAID6};
        self.chunk_type & (RAID5 | RAID6) != 0
    }

    /// Number of data stripes in a RAID5/6 chunk (total minus parity
    /// stripes), per `volumes.h`'s `nr_data_stripes` bookkeeping.
    pub fn nr_data_stripes(&self) -> u16 {
        use crate::btrfs::types::block_group_flags::{RAID5, RAID6};
        if self.chunk_type & RAID6 != 0 {
            self.num_stripes.saturating_sub(2)
        } else if self.chunk_type & RAID5 != 0 {
            self.num_stripes.saturating_sub(1)
        } else {
            self.num_stripes
        }
    }

    /// Number of independent mirrors for a logical read.
    pub fn num_copies(&self) -> u16 {
        use crate::btrfs::types::block_group_flags::{DUP, RAID1, RAID10};
        if self.chunk_type & (RAID1 | DUP) != 0 {
            2
        } else if self.chunk_type & RAID10 != 0 {
            self.sub_stripes.max(1)
        } else {
            1
        }
    }
}

/// `block_group_record`: logical start, length, flags (§3).
#[derive(Debug, Clone)]
pub struct BlockGroupRecord {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
    pub flags: u64,
    pub used: u64,
    pub chunk_objectid: u64,
}

/// `device_extent_record`: devid, phys offset, length, chunk_offset.
#[derive(Debug, Clone)]
pub struct DeviceExtentRecord {
    pub devid: u64,
    pub physical_offset: u64,
    pub length: u64,
    pub chunk_tree: u64,
    pub chunk_objectid: u64,
    pub chunk_offset: u64,
}

/// `device_record`: mirrors `volumes.h`'s `btrfs_device` for the fields
/// the checker cares about.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub devid: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub io_align: u32,
    pub io_width: u32,
    pub sector_size: u32,
    pub uuid: [u8; 16],
}

/// Result of [`crate::chunk::ChunkMap::cross_check_chunks_vs_block_groups_vs_dev_extents`]
/// (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkHealth {
    Good,
    /// Chunk exists, device extents match, but no `BLOCK_GROUP_ITEM`.
    NeedRebuild,
    /// Device extents missing or mismatched in length.
    Bad,
}

/// One physical stripe returned by [`crate::chunk::ChunkMap::translate`].
#[derive(Debug, Clone, Copy)]
pub struct StripeMapping {
    pub devid: u64,
    pub physical: u64,
    pub length: u64,
    pub is_parity: bool,
}

pub const STRIPE_LEN: u64 = BTRFS_STRIPE_LEN;
