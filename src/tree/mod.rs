//! C3: Tree walker — generic read/next/prev over B-tree nodes (§4.3).

pub mod path;

use zerocopy::FromBytes;

use crate::btrfs::format::{Header, ItemHeader, KeyPtr};
use crate::btrfs::types::Key;
use crate::chunk::ChunkMap;
use crate::error::FsckError;

pub use path::{Path, PathStep};

/// Abstraction over "read `len` bytes from device `devid` at physical
/// offset `physical`" — the only I/O primitive the tree walker needs.
/// Implemented by [`crate::io::device::DeviceSet`] in production and by
/// an in-memory fixture in tests.
pub trait BlockSource {
    fn read_physical(&mut self, devid: u64, physical: u64, len: usize) -> Result<Vec<u8>, FsckError>;
    fn write_physical(&mut self, devid: u64, physical: u64, buf: &[u8]) -> Result<(), FsckError>;
}

/// A parsed tree block: owns its raw bytes and exposes header/item/
/// key-pointer accessors without copying the payload region.
pub struct TreeBlock {
    buf: Vec<u8>,
    nodesize: usize,
}

impl TreeBlock {
    pub fn header(&self) -> &Header {
        Header::ref_from_prefix(&self.buf).expect("buffer validated at construction").0
    }

    pub fn level(&self) -> u8 {
        self.header().level
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn nritems(&self) -> usize {
        self.header().nritems.get() as usize
    }

    pub fn bytenr(&self) -> u64 {
        self.header().bytenr.get()
    }

    /// The `i`th key/pointer of an internal node.
    pub fn key_ptr(&self, i: usize) -> Option<KeyPtr> {
        if self.is_leaf() || i >= self.nritems() {
            return None;
        }
        let start = std::mem::size_of::<Header>() + i * std::mem::size_of::<KeyPtr>();
        KeyPtr::ref_from_prefix(&self.buf[start..]).ok().map(|(kp, _)| *kp)
    }

    /// The `i`th item header of a leaf.
    pub fn item_header(&self, i: usize) -> Option<ItemHeader> {
        if !self.is_leaf() || i >= self.nritems() {
            return None;
        }
        let start = std::mem::size_of::<Header>() + i * std::mem::size_of::<ItemHeader>();
        ItemHeader::ref_from_prefix(&self.buf[start..]).ok().map(|(ih, _)| *ih)
    }

    /// The `i`th item's payload bytes (grows backward from the tail).
    pub fn item_data(&self, i: usize) -> Option<&[u8]> {
        let ih = self.item_header(i)?;
        let start = std::mem::size_of::<Header>() + ih.offset.get() as usize;
        let end = start + ih.size.get() as usize;
        self.buf.get(start..end)
    }

    pub fn item_key(&self, i: usize) -> Option<Key> {
        Some(self.item_header(i)?.key.to_key())
    }

    pub fn key_at(&self, i: usize) -> Option<Key> {
        if self.is_leaf() {
            self.item_key(i)
        } else {
            self.key_ptr(i).map(|kp| kp.key.to_key())
        }
    }

    /// First key in the block (leaf item 0 or node pointer 0).
    pub fn first_key(&self) -> Option<Key> {
        self.key_at(0)
    }

    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub fn nodesize(&self) -> usize {
        self.nodesize
    }
}

/// Drives I/O through a [`ChunkMap`] and a [`BlockSource`] to resolve and
/// validate tree blocks (§4.3).
pub struct TreeReader<'a, B: BlockSource> {
    pub chunk_map: &'a ChunkMap,
    pub source: &'a mut B,
    pub fsid: [u8; 16],
    pub nodesize: u32,
}

impl<'a, B: BlockSource> TreeReader<'a, B> {
    pub fn new(chunk_map: &'a ChunkMap, source: &'a mut B, fsid: [u8; 16], nodesize: u32) -> Self {
        TreeReader { chunk_map, source, fsid, nodesize }
    }

    /// Resolve `bytenr` via the chunk map and read all mirrors until one
    /// whose header checksum matches and whose
    /// `bytenr`/`fsid`/`parent_transid` agree with expectations.
    pub fn read_tree_block(
        &mut self,
        bytenr: u64,
        expected_transid: u64,
    ) -> Result<TreeBlock, FsckError> {
        let num_copies = self.chunk_map.num_copies(bytenr, self.nodesize as u64);
        let mut last_err = FsckError::Corrupt("no readable mirror");

        for mirror in 0..num_copies as usize {
            let stripes = match self.chunk_map.translate(bytenr, self.nodesize as u64, mirror) {
                Ok(s) => s,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            let Some(stripe) = stripes.into_iter().find(|s| !s.is_parity) else {
                continue;
            };
            let buf = match self.source.read_physical(
                stripe.devid,
                stripe.physical,
                self.nodesize as usize,
            ) {
                Ok(b) => b,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };

            match validate_header(&buf, bytenr, &self.fsid, expected_transid) {
                Ok(()) => {
                    return Ok(TreeBlock { buf, nodesize: self.nodesize as usize });
                }
                Err(e) => {
                    log::warn!("tree block {bytenr} mirror {mirror} failed validation: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

fn validate_header(
    buf: &[u8],
    expected_bytenr: u64,
    fsid: &[u8; 16],
    expected_transid: u64,
) -> Result<(), FsckError> {
    let header = Header::ref_from_prefix(buf).map_err(|_| FsckError::Parse("tree block header"))?.0;

    let stored_csum = &header.csum[0..4];
    let computed = crc32c::crc32c(&buf[32..]).to_le_bytes();
    if stored_csum != computed {
        return Err(FsckError::CrcMismatch("tree block"));
    }
    if header.bytenr.get() != expected_bytenr {
        return Err(FsckError::Corrupt("tree block bytenr mismatch"));
    }
    if header.fsid != *fsid {
        return Err(FsckError::Corrupt("tree block fsid mismatch"));
    }
    if expected_transid != 0 && header.generation.get() != expected_transid {
        return Err(FsckError::Corrupt("tree block parent_transid mismatch"));
    }
    Ok(())
}

/// Verify a child's first key, bytenr and generation against the
/// parent's pointer at `slot`. Any mismatch is a corrupt_block (§4.3).
pub fn check_child_node(parent: &TreeBlock, slot: usize, child: &TreeBlock) -> Result<(), FsckError> {
    let kp = parent.key_ptr(slot).ok_or(FsckError::Corrupt("parent slot out of range"))?;
    if kp.blockptr.get() != child.bytenr() {
        return Err(FsckError::Corrupt("child bytenr does not match parent pointer"));
    }
    if kp.generation.get() != child.header().generation.get() {
        return Err(FsckError::Corrupt("child generation does not match parent pointer"));
    }
    let expected_key = kp.key.to_key();
    let actual_key = child.first_key().ok_or(FsckError::Corrupt("empty child block"))?;
    if expected_key != actual_key {
        return Err(FsckError::Corrupt("child first key does not match parent pointer"));
    }
    Ok(())
}

/// Structural validation: item offsets within bounds, items in strictly
/// ascending key order, no overlap of item data regions.
pub fn check_leaf(block: &TreeBlock) -> Result<(), FsckError> {
    let mut prev_key: Option<Key> = None;
    let mut prev_data_start = block.nodesize();
    for i in 0..block.nritems() {
        let ih = block.item_header(i).ok_or(FsckError::Corrupt("leaf item header out of range"))?;
        let key = ih.key.to_key();
        if let Some(pk) = prev_key {
            if key <= pk {
                return Err(FsckError::Corrupt("leaf items out of order"));
            }
        }
        prev_key = Some(key);

        let start = std::mem::size_of::<Header>() + ih.offset.get() as usize;
        let end = start + ih.size.get() as usize;
        if end > prev_data_start || start < std::mem::size_of::<Header>() + block.nritems() * std::mem::size_of::<ItemHeader>() {
            return Err(FsckError::Corrupt("leaf item data out of bounds or overlapping"));
        }
        prev_data_start = start;
    }
    Ok(())
}

pub fn check_node(block: &TreeBlock) -> Result<(), FsckError> {
    let mut prev_key: Option<Key> = None;
    for i in 0..block.nritems() {
        let kp = block.key_ptr(i).ok_or(FsckError::Corrupt("node pointer out of range"))?;
        let key = kp.key.to_key();
        if let Some(pk) = prev_key {
            if key <= pk {
                return Err(FsckError::Corrupt("node pointers out of order"));
            }
        }
        prev_key = Some(key);
    }
    Ok(())
}
