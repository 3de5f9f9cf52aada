//! Logical types shared across the on-disk format and the in-memory graph.

/// 64-bit logical address of a tree block or extent.
pub type Bytenr = u64;
pub type Generation = u64;
pub type Objectid = u64;

/// Well-known object ids (see `ctree.h` in the original sources).
pub const ROOT_TREE_OBJECTID: Objectid = 1;
pub const EXTENT_TREE_OBJECTID: Objectid = 2;
pub const CHUNK_TREE_OBJECTID: Objectid = 3;
pub const DEV_TREE_OBJECTID: Objectid = 4;
pub const FS_TREE_OBJECTID: Objectid = 5;
pub const ROOT_TREE_DIR_OBJECTID: Objectid = 6;
pub const CSUM_TREE_OBJECTID: Objectid = 7;
pub const QUOTA_TREE_OBJECTID: Objectid = 8;
pub const UUID_TREE_OBJECTID: Objectid = 9;
pub const FREE_SPACE_TREE_OBJECTID: Objectid = 10;
pub const ORPHAN_OBJECTID: Objectid = -5_i64 as u64;
pub const TREE_LOG_OBJECTID: Objectid = -7_i64 as u64;
pub const TREE_RELOC_OBJECTID: Objectid = -8_i64 as u64;
pub const DATA_RELOC_TREE_OBJECTID: Objectid = -9_i64 as u64;
pub const FIRST_FREE_OBJECTID: Objectid = 256;
pub const LAST_FREE_OBJECTID: Objectid = -256_i64 as u64;
pub const FIRST_CHUNK_TREE_OBJECTID: Objectid = 256;

/// Item types, as they appear in the `type` byte of a [`Key`].
///
/// Only the subset this core reads or writes is named; unknown bytes are
/// preserved verbatim when round-tripping an item the checker does not
/// interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ItemType {
    InodeItem = 1,
    InodeRef = 12,
    InodeExtref = 13,
    XattrItem = 24,
    OrphanItem = 48,
    DirLogItem = 60,
    DirLogIndex = 61,
    DirItem = 84,
    DirIndex = 96,
    ExtentData = 108,
    ExtentCsum = 128,
    RootItem = 132,
    RootBackref = 144,
    RootRef = 156,
    ExtentItem = 168,
    MetadataItem = 169,
    TreeBlockRef = 176,
    ExtentDataRef = 178,
    ExtentRefV0 = 180,
    SharedBlockRef = 182,
    SharedDataRef = 184,
    BlockGroupItem = 192,
    FreeSpaceInfo = 198,
    FreeSpaceExtent = 199,
    FreeSpaceBitmap = 200,
    DevExtent = 204,
    DevItem = 216,
    ChunkItem = 228,
    QgroupStatus = 240,
    QgroupInfo = 242,
    QgroupLimit = 243,
    QgroupRelation = 246,
    UuidKeySubvol = 251,
    UuidKeyReceivedSubvol = 252,
    StringItem = 253,
}

impl ItemType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use ItemType::*;
        Some(match v {
            1 => InodeItem,
            12 => InodeRef,
            13 => InodeExtref,
            24 => XattrItem,
            48 => OrphanItem,
            60 => DirLogItem,
            61 => DirLogIndex,
            84 => DirItem,
            96 => DirIndex,
            108 => ExtentData,
            128 => ExtentCsum,
            132 => RootItem,
            144 => RootBackref,
            156 => RootRef,
            168 => ExtentItem,
            169 => MetadataItem,
            176 => TreeBlockRef,
            178 => ExtentDataRef,
            180 => ExtentRefV0,
            182 => SharedBlockRef,
            184 => SharedDataRef,
            192 => BlockGroupItem,
            198 => FreeSpaceInfo,
            199 => FreeSpaceExtent,
            200 => FreeSpaceBitmap,
            204 => DevExtent,
            216 => DevItem,
            228 => ChunkItem,
            240 => QgroupStatus,
            242 => QgroupInfo,
            243 => QgroupLimit,
            246 => QgroupRelation,
            251 => UuidKeySubvol,
            252 => UuidKeyReceivedSubvol,
            253 => StringItem,
            _ => return None,
        })
    }
}

/// Lexicographic triple `(objectid, type, offset)` that orders every item
/// in every tree. Comparisons follow field order: objectid first, then
/// type, then offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub objectid: Objectid,
    pub item_type: u8,
    pub offset: u64,
}

impl Key {
    pub const fn new(objectid: Objectid, item_type: u8, offset: u64) -> Self {
        Key { objectid, item_type, offset }
    }

    /// Smallest possible key for a given objectid, used to seek to the
    /// start of an object's item run.
    pub const fn floor(objectid: Objectid) -> Self {
        Key { objectid, item_type: 0, offset: 0 }
    }

    /// Largest possible key for a given objectid.
    pub const fn ceiling(objectid: Objectid) -> Self {
        Key { objectid, item_type: u8::MAX, offset: u64::MAX }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.objectid, self.item_type, self.offset)
    }
}

/// Chunk/block-group type flags (subset of `BTRFS_BLOCK_GROUP_*`).
pub mod block_group_flags {
    pub const DATA: u64 = 1 << 0;
    pub const SYSTEM: u64 = 1 << 1;
    pub const METADATA: u64 = 1 << 2;
    pub const RAID0: u64 = 1 << 3;
    pub const RAID1: u64 = 1 << 4;
    pub const DUP: u64 = 1 << 5;
    pub const RAID10: u64 = 1 << 6;
    pub const RAID5: u64 = 1 << 7;
    pub const RAID6: u64 = 1 << 8;

    pub const TYPE_MASK: u64 = DATA | SYSTEM | METADATA;
    pub const PROFILE_MASK: u64 = RAID0 | RAID1 | DUP | RAID10 | RAID5 | RAID6;
}

/// Extent-item flags (`BTRFS_EXTENT_FLAG_*`).
pub mod extent_flags {
    pub const DATA: u64 = 1 << 0;
    pub const TREE_BLOCK: u64 = 1 << 1;
    pub const FULL_BACKREF: u64 = 1 << 8;
}

/// Checksum algorithms named in `btrfs_super_block.csum_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsumType {
    Crc32c,
    Xxhash,
    Sha256,
    Blake2b,
}

impl CsumType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(CsumType::Crc32c),
            1 => Some(CsumType::Xxhash),
            2 => Some(CsumType::Sha256),
            3 => Some(CsumType::Blake2b),
            _ => None,
        }
    }

    /// Digest size in bytes (`btrfs_csum_sizes` in the original).
    pub fn size(self) -> usize {
        match self {
            CsumType::Crc32c => 4,
            CsumType::Xxhash => 8,
            CsumType::Sha256 | CsumType::Blake2b => 32,
        }
    }
}

pub const BTRFS_STRIPE_LEN: u64 = 64 * 1024;
pub const BTRFS_CSUM_SIZE: usize = 32;
