//! End-to-end exercise of C2 (chunk map) + C3 (tree walker) + C5
//! (fs-tree checker) over a hand-built single-leaf fs tree, grounded in
//! the concrete scenarios of §8 (S1 "no faults", S3 "missing DIR_INDEX").
//!
//! There is no on-disk btrfs image fixture here (unlike the teacher's
//! `tests/scan_fixture.rs`, which reads a real XFS image byte-for-byte):
//! this crate's on-disk format is synthesized in memory instead, since a
//! real multi-megabyte btrfs image is impractical to vendor as a test
//! fixture.

use std::collections::HashMap;

use btrfsck_core::btrfs::format::{Chunk, ExtentItem};
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use btrfsck_core::btrfs::types::{ItemType, Key};
use btrfsck_core::chunk::{ChunkMap, ChunkStripe};
use btrfsck_core::error::FsckError;
use btrfsck_core::extent_graph::{ExtentGraph, ParentOrRoot};
use btrfsck_core::fs_checker::{InodeTable, RefErrorBits, scan_fs_tree};
use btrfsck_core::session::{CheckMode, Session};
use btrfsck_core::tree::{BlockSource, TreeReader};

const NODESIZE: u32 = 4096;
const DEVID: u64 = 1;
const ROOT_BYTENR: u64 = 0x10000;

struct MemBlocks {
    blocks: HashMap<(u64, u64), Vec<u8>>,
}

impl MemBlocks {
    fn new() -> Self {
        MemBlocks { blocks: HashMap::new() }
    }

    fn put(&mut self, devid: u64, physical: u64, bytes: Vec<u8>) {
        self.blocks.insert((devid, physical), bytes);
    }
}

impl BlockSource for MemBlocks {
    fn read_physical(&mut self, devid: u64, physical: u64, len: usize) -> Result<Vec<u8>, FsckError> {
        let buf = self
            .blocks
            .get(&(devid, physical))
            .ok_or(FsckError::Corrupt("no block at that physical address"))?;
        Ok(buf.get(..len).ok_or(FsckError::Corrupt("short block"))?.to_vec())
    }

    fn write_physical(&mut self, devid: u64, physical: u64, buf: &[u8]) -> Result<(), FsckError> {
        self.blocks.insert((devid, physical), buf.to_vec());
        Ok(())
    }
}

fn disk_key_bytes(key: Key) -> Vec<u8> {
    let mut v = Vec::with_capacity(17);
    v.extend_from_slice(&key.objectid.to_le_bytes());
    v.push(key.item_type);
    v.extend_from_slice(&key.offset.to_le_bytes());
    v
}

/// Builds a single leaf block's raw bytes, items in ascending key order,
/// payloads packed backward from the tail (real btrfs leaf layout).
fn build_leaf(fsid: [u8; 16], bytenr: u64, generation: u64, mut items: Vec<(Key, Vec<u8>)>) -> Vec<u8> {
    items.sort_by_key(|(k, _)| *k);
    let nodesize = NODESIZE as usize;
    let mut buf = vec![0u8; nodesize];

    const HEADER_SIZE: usize = 101;
    const ITEM_HEADER_SIZE: usize = 25;

    let nritems = items.len() as u32;
    let mut tail = nodesize;
    let mut item_headers = Vec::with_capacity(items.len());
    for (key, payload) in &items {
        tail -= payload.len();
        let offset = (tail - HEADER_SIZE) as u32;
        let size = payload.len() as u32;
        buf[tail..tail + payload.len()].copy_from_slice(payload);
        item_headers.push((*key, offset, size));
    }

    let mut cursor = HEADER_SIZE;
    for (key, offset, size) in &item_headers {
        let kb = disk_key_bytes(*key);
        buf[cursor..cursor + 17].copy_from_slice(&kb);
        buf[cursor + 17..cursor + 21].copy_from_slice(&offset.to_le_bytes());
        buf[cursor + 21..cursor + 25].copy_from_slice(&size.to_le_bytes());
        cursor += ITEM_HEADER_SIZE;
    }

    // Header, written last so its checksum covers the finished buffer.
    buf[32..48].copy_from_slice(&fsid);
    buf[48..56].copy_from_slice(&bytenr.to_le_bytes());
    buf[56..64].copy_from_slice(&0u64.to_le_bytes()); // flags
    buf[64..80].copy_from_slice(&[0u8; 16]); // chunk_tree_uuid
    buf[80..88].copy_from_slice(&generation.to_le_bytes());
    buf[88..96].copy_from_slice(&0u64.to_le_bytes()); // owner
    buf[96..100].copy_from_slice(&nritems.to_le_bytes());
    buf[100] = 0; // level = leaf

    let csum = crc32c::crc32c(&buf[32..]).to_le_bytes();
    buf[0..4].copy_from_slice(&csum);

    buf
}

fn inode_item_bytes(generation: u64, size: u64, nbytes: u64, nlink: u32, mode: u32) -> Vec<u8> {
    let mut v = Vec::with_capacity(160);
    v.extend_from_slice(&generation.to_le_bytes());
    v.extend_from_slice(&generation.to_le_bytes()); // transid
    v.extend_from_slice(&size.to_le_bytes());
    v.extend_from_slice(&nbytes.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes()); // block_group
    v.extend_from_slice(&nlink.to_le_bytes());
    v.extend_from_slice(&0u32.to_le_bytes()); // uid
    v.extend_from_slice(&0u32.to_le_bytes()); // gid
    v.extend_from_slice(&mode.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes()); // rdev
    v.extend_from_slice(&0u64.to_le_bytes()); // flags
    v.extend_from_slice(&0u64.to_le_bytes()); // sequence
    v.extend_from_slice(&[0u8; 32]); // reserved[4]
    for _ in 0..4 {
        v.extend_from_slice(&0u64.to_le_bytes()); // sec
        v.extend_from_slice(&0u32.to_le_bytes()); // nsec
    }
    v
}

fn inode_ref_bytes(index: u64, name: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(10 + name.len());
    v.extend_from_slice(&index.to_le_bytes());
    v.extend_from_slice(&(name.len() as u16).to_le_bytes());
    v.extend_from_slice(name);
    v
}

fn dir_item_bytes(location: Key, file_type: u8, name: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(30 + name.len());
    v.extend_from_slice(&disk_key_bytes(location));
    v.extend_from_slice(&0u64.to_le_bytes()); // transid
    v.extend_from_slice(&0u16.to_le_bytes()); // data_len
    v.extend_from_slice(&(name.len() as u16).to_le_bytes());
    v.push(file_type);
    v.extend_from_slice(name);
    v
}

fn file_extent_bytes(disk_bytenr: u64, disk_num_bytes: u64, num_bytes: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(53);
    v.extend_from_slice(&1u64.to_le_bytes()); // generation
    v.extend_from_slice(&num_bytes.to_le_bytes()); // ram_bytes
    v.push(0); // compression
    v.push(0); // encryption
    v.extend_from_slice(&0u16.to_le_bytes()); // other_encoding
    v.push(1); // extent_type = REG
    v.extend_from_slice(&disk_bytenr.to_le_bytes());
    v.extend_from_slice(&disk_num_bytes.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes()); // offset
    v.extend_from_slice(&num_bytes.to_le_bytes());
    v
}

fn dir_name_hash(name: &[u8]) -> u64 {
    crc32c::crc32c_append(!1u32, name) as u64
}

const DIR_INO: u64 = 256;
const FILE_INO: u64 = 257;
const FSID: [u8; 16] = [7u8; 16];

fn setup(with_dir_index: bool) -> (TreeReader<'static, MemBlocks>, InodeTable, ExtentGraph, Session) {
    let mut items = vec![
        (
            Key::new(DIR_INO, ItemType::InodeItem as u8, 0),
            inode_item_bytes(1, 0, 0, 0, 0o040755),
        ),
        (
            Key::new(FILE_INO, ItemType::InodeItem as u8, 0),
            inode_item_bytes(1, 4096, 4096, 1, 0o100644),
        ),
        (
            Key::new(FILE_INO, ItemType::InodeRef as u8, DIR_INO),
            inode_ref_bytes(2, b"foo"),
        ),
        (
            Key::new(DIR_INO, ItemType::DirItem as u8, dir_name_hash(b"foo")),
            dir_item_bytes(Key::new(FILE_INO, ItemType::InodeItem as u8, 0), 1, b"foo"),
        ),
        (
            Key::new(FILE_INO, ItemType::ExtentData as u8, 0),
            file_extent_bytes(0x20000, 4096, 4096),
        ),
    ];
    if with_dir_index {
        items.push((
            Key::new(DIR_INO, ItemType::DirIndex as u8, 2),
            dir_item_bytes(Key::new(FILE_INO, ItemType::InodeItem as u8, 0), 1, b"foo"),
        ));
    }

    let leaf_bytes = build_leaf(FSID, ROOT_BYTENR, 1, items);

    let mut devices = Box::new(MemBlocks::new());
    devices.put(DEVID, ROOT_BYTENR, leaf_bytes);
    let devices: &'static mut MemBlocks = Box::leak(devices);

    let mut chunk_map = Box::new(ChunkMap::new());
    let chunk = Chunk {
        length: U64::new(NODESIZE as u64),
        owner: U64::new(0),
        stripe_len: U64::new(65536),
        chunk_type: U64::new(0),
        io_align: U32::new(0),
        io_width: U32::new(0),
        sector_size: U32::new(0),
        num_stripes: U16::new(1),
        sub_stripes: U16::new(1),
    };
    chunk_map
        .ingest_chunk_item(
            0,
            ROOT_BYTENR,
            &chunk,
            vec![ChunkStripe { devid: DEVID, physical: ROOT_BYTENR }],
        )
        .expect("seeding the identity chunk cannot fail");
    chunk_map.mark_loaded();
    let chunk_map: &'static ChunkMap = Box::leak(chunk_map);

    let reader = TreeReader::new(chunk_map, devices, FSID, NODESIZE);
    let table = InodeTable::new();
    let graph = ExtentGraph::new();
    let session = Session::new(CheckMode::Original, false);
    (reader, table, graph, session)
}

#[test]
fn clean_tree_reports_no_ref_errors() {
    let (mut reader, mut table, mut graph, session) = setup(true);
    scan_fs_tree(&mut reader, ROOT_BYTENR, DIR_INO, &mut table, Some(&mut graph), None, &session)
        .expect("scan should succeed");

    let file_rec = table.get(FILE_INO).expect("file inode recorded");
    assert!(file_rec.errors.is_empty(), "file inode should have no errors: {:?}", file_rec.errors);

    let dir_rec = table.get(DIR_INO).expect("dir inode recorded");
    let foo = dir_rec.names.iter().find(|n| n.name == b"foo").expect("foo name recorded");
    assert!(foo.is_fully_linked(), "foo should be fully linked when all three refs are present");
}

#[test]
fn missing_dir_index_is_flagged() {
    let (mut reader, mut table, mut graph, session) = setup(false);
    scan_fs_tree(&mut reader, ROOT_BYTENR, DIR_INO, &mut table, Some(&mut graph), None, &session)
        .expect("scan should succeed");

    let dir_rec = table.get(DIR_INO).expect("dir inode recorded");
    let foo = dir_rec
        .names
        .iter()
        .find(|n| n.name == b"foo")
        .expect("foo name recorded even without a DIR_INDEX");
    assert!(foo.errors.contains(RefErrorBits::DIR_INDEX_MISSING));
    assert!(!foo.is_fully_linked());
}

#[test]
fn extent_data_is_attributed_as_a_data_backref() {
    let (mut reader, mut table, mut graph, session) = setup(true);
    scan_fs_tree(&mut reader, ROOT_BYTENR, DIR_INO, &mut table, Some(&mut graph), None, &session)
        .expect("scan should succeed");

    let found = graph
        .classify_all(&session)
        .into_iter()
        .any(|(start, _len, _bits)| start == 0x20000);
    assert!(!found, "an extent with no EXTENT_ITEM is not yet in the graph, only its backref is");
}

#[test]
fn inline_backref_and_fs_tree_sweep_do_not_double_count_same_reference() {
    let (mut reader, mut table, mut graph, session) = setup(true);

    // Simulate the extent-tree half of the scan: an EXTENT_ITEM for the
    // data extent plus the inline EXTENT_DATA_REF naming exactly the
    // (root, owner, offset) the fs-tree sweep below will independently
    // claim for the same physical reference.
    let item = ExtentItem { refs: U64::new(1), generation: U64::new(1), flags: U64::new(0) };
    graph.process_extent_item(0x20000, 4096, &item, false).expect("ingest extent item");
    graph.record_data_backref(0x20000, 4096, ParentOrRoot::Root(DIR_INO), FILE_INO, 0);

    scan_fs_tree(&mut reader, ROOT_BYTENR, DIR_INO, &mut table, Some(&mut graph), None, &session)
        .expect("scan should succeed");

    let rec = graph.get(0x20000, 4096).expect("extent record created by process_extent_item");
    assert_eq!(rec.refs, 1, "the inline backref and the fs-tree sweep name the same reference and must count once");
}
