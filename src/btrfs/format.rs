//! Packed on-disk structures, parsed with `zerocopy`.
//!
//! Everything here is little-endian, unlike the teacher crate's XFS
//! structures (big-endian). Field names follow the on-disk format
//! documented in `ctree.h` of the original sources.

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

pub const BTRFS_MAGIC: u64 = 0x4d5f53665248425f; // "_BHRfS_M"
pub const BTRFS_SUPER_INFO_OFFSET: u64 = 64 * 1024;
pub const BTRFS_SUPER_INFO_SIZE: usize = 4096;
pub const BTRFS_FSID_SIZE: usize = 16;
pub const BTRFS_UUID_SIZE: usize = 16;
pub const BTRFS_CSUM_SIZE: usize = 32;
pub const BTRFS_LABEL_SIZE: usize = 256;
pub const BTRFS_SYSTEM_CHUNK_ARRAY_SIZE: usize = 2048;
pub const BTRFS_NUM_BACKUP_ROOTS: usize = 4;

pub const SUPER_MIRROR_OFFSETS: [u64; 3] = [
    64 * 1024 * 1024,
    256 * 1024 * 1024 * 1024,
    1024 * 1024 * 1024 * 1024 * 1024,
];

/// On-disk key, embedded in items, node pointers and backup roots.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskKey {
    pub objectid: U64,
    pub item_type: u8,
    pub offset: U64,
}

impl DiskKey {
    pub fn to_key(self) -> crate::btrfs::types::Key {
        crate::btrfs::types::Key::new(self.objectid.get(), self.item_type, self.offset.get())
    }
}

/// One backup-root slot embedded in the superblock.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct RootBackup {
    pub tree_root: U64,
    pub tree_root_gen: U64,
    pub chunk_root: U64,
    pub chunk_root_gen: U64,
    pub extent_root: U64,
    pub extent_root_gen: U64,
    pub fs_root: U64,
    pub fs_root_gen: U64,
    pub dev_root: U64,
    pub dev_root_gen: U64,
    pub csum_root: U64,
    pub csum_root_gen: U64,
    pub total_bytes: U64,
    pub bytes_used: U64,
    pub num_devices: U64,
    pub unused_64: [U64; 4],
    pub tree_root_level: u8,
    pub chunk_root_level: u8,
    pub extent_root_level: u8,
    pub fs_root_level: u8,
    pub dev_root_level: u8,
    pub csum_root_level: u8,
    pub unused_8: [u8; 10],
}

/// The 4096-byte superblock, found at `BTRFS_SUPER_INFO_OFFSET` and at
/// each mirror offset in [`SUPER_MIRROR_OFFSETS`].
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    pub csum: [u8; BTRFS_CSUM_SIZE],
    pub fsid: [u8; BTRFS_FSID_SIZE],
    pub bytenr: U64,
    pub flags: U64,
    pub magic: U64,
    pub generation: U64,
    pub root: U64,
    pub chunk_root: U64,
    pub log_root: U64,
    pub log_root_transid: U64,
    pub total_bytes: U64,
    pub bytes_used: U64,
    pub root_dir_objectid: U64,
    pub num_devices: U64,
    pub sectorsize: U32,
    pub nodesize: U32,
    pub leafsize: U32,
    pub stripesize: U32,
    pub sys_chunk_array_size: U32,
    pub chunk_root_generation: U64,
    pub compat_flags: U64,
    pub compat_ro_flags: U64,
    pub incompat_flags: U64,
    pub csum_type: U16,
    pub root_level: u8,
    pub chunk_root_level: u8,
    pub log_root_level: u8,
    pub dev_item: DevItem,
    pub label: [u8; BTRFS_LABEL_SIZE],
    pub cache_generation: U64,
    pub uuid_tree_generation: U64,
    pub metadata_uuid: [u8; BTRFS_FSID_SIZE],
    pub reserved: [U64; 28],
    pub sys_chunk_array: [u8; BTRFS_SYSTEM_CHUNK_ARRAY_SIZE],
    pub backup_roots: [RootBackup; BTRFS_NUM_BACKUP_ROOTS],
}

/// The per-device descriptor embedded in the superblock and duplicated
/// in `DEV_ITEM` entries of the device tree.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct DevItem {
    pub devid: U64,
    pub total_bytes: U64,
    pub bytes_used: U64,
    pub io_align: U32,
    pub io_width: U32,
    pub sector_size: U32,
    pub dev_type: U64,
    pub generation: U64,
    pub start_offset: U64,
    pub dev_group: U32,
    pub seek_speed: u8,
    pub bandwidth: u8,
    pub uuid: [u8; BTRFS_UUID_SIZE],
    pub fsid: [u8; BTRFS_FSID_SIZE],
}

/// Header prefixing every tree block (leaf or internal node).
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct Header {
    pub csum: [u8; BTRFS_CSUM_SIZE],
    pub fsid: [u8; BTRFS_FSID_SIZE],
    pub bytenr: U64,
    pub flags: U64,
    pub chunk_tree_uuid: [u8; BTRFS_UUID_SIZE],
    pub generation: U64,
    pub owner: U64,
    pub nritems: U32,
    pub level: u8,
}

pub const HEADER_FLAG_WRITTEN: u64 = 1 << 0;
pub const HEADER_FLAG_RELOC: u64 = 1 << 1;

/// Leaf item descriptor: key plus the (offset, size) of its payload,
/// which grows backward from the end of the block.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct ItemHeader {
    pub key: DiskKey,
    pub offset: U32,
    pub size: U32,
}

/// Internal-node pointer: key of the first item in the child, the
/// child's bytenr, and the child's generation at the time it was CoW'd.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct KeyPtr {
    pub key: DiskKey,
    pub blockptr: U64,
    pub generation: U64,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct Stripe {
    pub devid: U64,
    pub offset: U64,
    pub dev_uuid: [u8; BTRFS_UUID_SIZE],
}

/// Fixed portion of a `CHUNK_ITEM`; followed by `num_stripes` [`Stripe`]s.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct Chunk {
    pub length: U64,
    pub owner: U64,
    pub stripe_len: U64,
    pub chunk_type: U64,
    pub io_align: U32,
    pub io_width: U32,
    pub sector_size: U32,
    pub num_stripes: U16,
    pub sub_stripes: U16,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct DevExtent {
    pub chunk_tree: U64,
    pub chunk_objectid: U64,
    pub chunk_offset: U64,
    pub length: U64,
    pub chunk_tree_uuid: [u8; BTRFS_UUID_SIZE],
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockGroupItem {
    pub used: U64,
    pub chunk_objectid: U64,
    pub flags: U64,
}

/// Fixed portion of an `EXTENT_ITEM`; followed by `EXTENT_ITEM_REF_COUNT`
/// worth of inline refs when `flags & TREE_BLOCK` is unset, or an
/// embedded [`TreeBlockInfo`] + inline refs when it is set.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct ExtentItem {
    pub refs: U64,
    pub generation: U64,
    pub flags: U64,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct TreeBlockInfo {
    pub key: DiskKey,
    pub level: u8,
}

/// `METADATA_ITEM`s reuse [`ExtentItem`] with an implied `nodesize`
/// length and no embedded [`TreeBlockInfo`] (the level comes from the
/// item's key offset instead).
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct InlineRefHeader {
    pub ref_type: u8,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct TreeBlockRef {
    pub root: U64,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct SharedBlockRef {
    pub parent: U64,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct ExtentDataRef {
    pub root: U64,
    pub objectid: U64,
    pub offset: U64,
    pub count: U32,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct SharedDataRef {
    pub parent: U64,
    pub count: U32,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct InodeItem {
    pub generation: U64,
    pub transid: U64,
    pub size: U64,
    pub nbytes: U64,
    pub block_group: U64,
    pub nlink: U32,
    pub uid: U32,
    pub gid: U32,
    pub mode: U32,
    pub rdev: U64,
    pub flags: U64,
    pub sequence: U64,
    pub reserved: [U64; 4],
    pub atime: TimeSpec,
    pub ctime: TimeSpec,
    pub mtime: TimeSpec,
    pub otime: TimeSpec,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct TimeSpec {
    pub sec: U64,
    pub nsec: U32,
}

/// Fixed header of an `INODE_REF`; followed by `name_len` bytes of name.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct InodeRef {
    pub index: U64,
    pub name_len: U16,
}

/// Fixed header of an `INODE_EXTREF`; followed by `name_len` bytes of name.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct InodeExtref {
    pub parent_objectid: U64,
    pub index: U64,
    pub name_len: U16,
}

/// Fixed header of a `DIR_ITEM`/`DIR_INDEX`/`XATTR_ITEM` entry; followed
/// by `name_len` bytes of name then `data_len` bytes of data.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct DirItem {
    pub location: DiskKey,
    pub transid: U64,
    pub data_len: U16,
    pub name_len: U16,
    pub file_type: u8,
}

/// Fixed header of an `EXTENT_DATA` item.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct FileExtentItem {
    pub generation: U64,
    pub ram_bytes: U64,
    pub compression: u8,
    pub encryption: u8,
    pub other_encoding: U16,
    pub extent_type: u8,
    // For EXTENT_TYPE_REGULAR/PREALLOC, the fields below follow.
    // For EXTENT_TYPE_INLINE, inline data follows `extent_type` directly
    // and the fields below do not exist.
    pub disk_bytenr: U64,
    pub disk_num_bytes: U64,
    pub offset: U64,
    pub num_bytes: U64,
}

pub const FILE_EXTENT_INLINE: u8 = 0;
pub const FILE_EXTENT_REG: u8 = 1;
pub const FILE_EXTENT_PREALLOC: u8 = 2;

/// Header size of a regular/prealloc `EXTENT_DATA` item (inline items
/// are shorter: just up through `extent_type`).
pub const FILE_EXTENT_INLINE_HEADER_SIZE: usize = 21;

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct RootItem {
    pub inode: InodeItem,
    pub generation: U64,
    pub root_dirid: U64,
    pub bytenr: U64,
    pub byte_limit: U64,
    pub bytes_used: U64,
    pub last_snapshot: U64,
    pub flags: U64,
    pub refs: U32,
    pub drop_progress: DiskKey,
    pub drop_level: u8,
    pub level: u8,
    pub generation_v2: U64,
    pub uuid: [u8; BTRFS_UUID_SIZE],
    pub parent_uuid: [u8; BTRFS_UUID_SIZE],
    pub received_uuid: [u8; BTRFS_UUID_SIZE],
    pub ctransid: U64,
    pub otransid: U64,
    pub stransid: U64,
    pub rtransid: U64,
    pub ctime: TimeSpec,
    pub otime: TimeSpec,
    pub stime: TimeSpec,
    pub rtime: TimeSpec,
    pub reserved: [U64; 8],
}

/// Fixed header of a `ROOT_REF`/`ROOT_BACKREF`; followed by `name_len`
/// bytes of name.
#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct RootRef {
    pub dirid: U64,
    pub sequence: U64,
    pub name_len: U16,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct QgroupInfoItem {
    pub generation: U64,
    pub referenced: U64,
    pub referenced_compressed: U64,
    pub exclusive: U64,
    pub exclusive_compressed: U64,
}

#[derive(FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
#[repr(C)]
pub struct QgroupStatusItem {
    pub version: U64,
    pub generation: U64,
    pub flags: U64,
    pub rescan: U64,
}

pub const QGROUP_STATUS_FLAG_INCONSISTENT: u64 = 1 << 0;
pub const QGROUP_STATUS_FLAG_RESCAN: u64 = 1 << 1;
