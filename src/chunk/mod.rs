//! C2: Chunk / device map — logical→physical translation (§4.2).

pub mod records;

use std::collections::HashMap;

use crate::btrfs::superblock::SuperblockInfo;
use crate::btrfs::types::block_group_flags::{RAID5, RAID6};
use crate::cache::{DeviceExtentCache, ExtentCache};
use crate::error::FsckError;
use crate::session::Session;

pub use records::{
    BlockGroupRecord, ChunkHealth, ChunkRecord, ChunkStripe, DeviceExtentRecord, DeviceRecord,
    StripeMapping, STRIPE_LEN,
};

/// Logical→physical translation map, built once before any tree walk
/// that needs block I/O beyond the superblock.
#[derive(Default)]
pub struct ChunkMap {
    chunks: ExtentCache<ChunkRecord>,
    block_groups: ExtentCache<BlockGroupRecord>,
    device_extents: DeviceExtentCache<DeviceExtentRecord>,
    devices: HashMap<u64, DeviceRecord>,
    loaded: bool,
}

impl ChunkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the map from the superblock's embedded system chunk array.
    /// Enough to translate the chunk-tree root itself; `ingest_*` calls
    /// from a C3-driven walk of the chunk/device trees complete the map.
    pub fn bootstrap(&mut self, info: &SuperblockInfo) -> Result<(), FsckError> {
        for bc in &info.bootstrap_chunks {
            let key = bc.key.to_key();
            let stripes = bc
                .stripes
                .iter()
                .map(|s| ChunkStripe { devid: s.devid.get(), physical: s.offset.get() })
                .collect();
            self.ingest_chunk_item(
                key.objectid,
                key.offset,
                &bc.chunk,
                stripes,
            )?;
        }
        Ok(())
    }

    /// Record one `CHUNK_ITEM` (key offset is the chunk's logical start).
    pub fn ingest_chunk_item(
        &mut self,
        objectid: u64,
        logical: u64,
        chunk: &crate::btrfs::format::Chunk,
        stripes: Vec<ChunkStripe>,
    ) -> Result<(), FsckError> {
        let record = ChunkRecord {
            objectid,
            logical,
            length: chunk.length.get(),
            chunk_type: chunk.chunk_type.get(),
            stripe_len: chunk.stripe_len.get(),
            num_stripes: chunk.num_stripes.get(),
            sub_stripes: chunk.sub_stripes.get(),
            stripes,
            block_group_seen: false,
        };
        match self.chunks.insert(logical, record.length, record) {
            Ok(()) => Ok(()),
            Err(FsckError::AlreadyPresent) => Ok(()), // duplicate chunk-tree leaf, idempotent ingest
            Err(e) => Err(e),
        }
    }

    pub fn ingest_block_group_item(
        &mut self,
        logical: u64,
        length: u64,
        flags: u64,
        used: u64,
        chunk_objectid: u64,
    ) -> Result<(), FsckError> {
        let record = BlockGroupRecord {
            objectid: logical,
            item_type: 192, // BLOCK_GROUP_ITEM
            offset: length,
            flags,
            used,
            chunk_objectid,
        };
        if let Some((_, _, chunk)) = self.chunks.lookup_mut(logical, length) {
            chunk.block_group_seen = true;
        }
        match self.block_groups.insert(logical, length, record) {
            Ok(()) | Err(FsckError::AlreadyPresent) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn ingest_device_extent_item(
        &mut self,
        devid: u64,
        physical_offset: u64,
        length: u64,
        chunk_tree: u64,
        chunk_objectid: u64,
        chunk_offset: u64,
    ) -> Result<(), FsckError> {
        let record = DeviceExtentRecord {
            devid,
            physical_offset,
            length,
            chunk_tree,
            chunk_objectid,
            chunk_offset,
        };
        match self.device_extents.insert(devid, physical_offset, length, record) {
            Ok(()) | Err(FsckError::AlreadyPresent) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn ingest_device_item(&mut self, dev: DeviceRecord) {
        self.devices.insert(dev.devid, dev);
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn device(&self, devid: u64) -> Option<&DeviceRecord> {
        self.devices.get(&devid)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn chunks(&self) -> impl Iterator<Item = (u64, u64, &ChunkRecord)> {
        self.chunks.iter()
    }

    pub fn block_groups(&self) -> impl Iterator<Item = (u64, u64, &BlockGroupRecord)> {
        self.block_groups.iter()
    }

    fn chunk_for(&self, logical: u64, length: u64) -> Option<(u64, u64, &ChunkRecord)> {
        self.chunks.lookup(logical, length)
    }

    /// Number of independent mirrors for a logical range.
    pub fn num_copies(&self, logical: u64, length: u64) -> u16 {
        self.chunk_for(logical, length).map(|(_, _, c)| c.num_copies()).unwrap_or(1)
    }

    /// Translate a logical range into its physical stripes. For
    /// single/DUP/RAID0/1/10 this is a simple mapping with at most
    /// `num_copies` mirrors; RAID5/6 additionally marks the parity
    /// stripe(s).
    pub fn translate(
        &self,
        logical: u64,
        length: u64,
        mirror: usize,
    ) -> Result<Vec<StripeMapping>, FsckError> {
        let (chunk_start, _chunk_len, chunk) = self
            .chunk_for(logical, length)
            .ok_or(FsckError::Corrupt("logical address not covered by any chunk"))?;

        let offset_in_chunk = logical - chunk_start;

        if chunk.is_raid56() {
            return Ok(self.translate_raid56(chunk, offset_in_chunk, length));
        }

        let stripe_index = if chunk.stripes.is_empty() {
            return Err(FsckError::Corrupt("chunk has no stripes"));
        } else {
            mirror.min(chunk.stripes.len() - 1)
        };
        let stripe = chunk.stripes[stripe_index];
        Ok(vec![StripeMapping {
            devid: stripe.devid,
            physical: stripe.physical + offset_in_chunk,
            length,
            is_parity: false,
        }])
    }

    fn translate_raid56(
        &self,
        chunk: &ChunkRecord,
        offset_in_chunk: u64,
        length: u64,
    ) -> Vec<StripeMapping> {
        let data_stripes = chunk.nr_data_stripes().max(1) as u64;
        let stripe_len = chunk.stripe_len.max(1);
        let stripe_nr = offset_in_chunk / stripe_len;
        let data_stripe_idx = (stripe_nr % data_stripes) as usize;

        let mut out = Vec::with_capacity(chunk.stripes.len());
        for (i, s) in chunk.stripes.iter().enumerate() {
            let is_parity = i as u64 >= data_stripes;
            let physical = s.physical + (stripe_nr / data_stripes) * stripe_len
                + offset_in_chunk % stripe_len;
            if i == data_stripe_idx || is_parity {
                out.push(StripeMapping {
                    devid: s.devid,
                    physical,
                    length,
                    is_parity,
                });
            }
        }
        out
    }

    /// True if `[start, start+len)` crosses a stripe boundary inside its
    /// chunk.
    pub fn check_crossing_stripes(&self, start: u64, len: u64) -> bool {
        let Some((chunk_start, _, chunk)) = self.chunk_for(start, len) else {
            return false;
        };
        let stripe_len = chunk.stripe_len.max(1);
        let offset = start - chunk_start;
        let first_stripe = offset / stripe_len;
        let last_stripe = (offset + len.saturating_sub(1)) / stripe_len;
        first_stripe != last_stripe
    }

    /// Three-way reconciliation classifying each chunk as good,
    /// need-rebuild (missing block group), or bad (missing/mismatched
    /// device extents).
    pub fn cross_check_chunks_vs_block_groups_vs_dev_extents(
        &self,
        session: &Session,
    ) -> Vec<(u64, ChunkHealth)> {
        let mut out = Vec::new();
        for (logical, length, chunk) in self.chunks.iter() {
            let mut ok = true;
            for stripe in &chunk.stripes {
                match self.device_extents.lookup(stripe.devid, stripe.physical, length) {
                    Some((_, dext)) => {
                        if dext.length != chunk.stripe_len
                            && dext.length != length / chunk.num_stripes.max(1) as u64
                        {
                            log::warn!(
                                "chunk {}: device extent length mismatch on devid {}",
                                logical,
                                stripe.devid
                            );
                            ok = false;
                        }
                    }
                    None => {
                        log::warn!(
                            "chunk {}: no device extent on devid {} at {}",
                            logical,
                            stripe.devid,
                            stripe.physical
                        );
                        ok = false;
                    }
                }
            }
            let health = if !ok {
                ChunkHealth::Bad
            } else if !chunk.block_group_seen {
                ChunkHealth::NeedRebuild
            } else {
                ChunkHealth::Good
            };
            if health != ChunkHealth::Good {
                session.record_error_found();
            }
            out.push((logical, health));
        }
        out
    }
}

pub const fn chunk_type_of_flags(flags: u64) -> u64 {
    flags
}

pub fn is_raid56_flags(flags: u64) -> bool {
    flags & (RAID5 | RAID6) != 0
}
