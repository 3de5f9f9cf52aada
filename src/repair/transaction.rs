//! Transactional repair primitive (§4.7).
//!
//! Every repair mutates tree blocks through a `Transaction`: each write
//! targets a freshly copy-on-written block rather than the block just
//! read, and nothing the transaction touched is visible to a concurrent
//! reader until [`Transaction::commit`]. A transaction that hits an
//! error partway through is rolled back by simply dropping it without
//! committing — no blocks were ever linked into a live root until commit
//! writes the new root pointer.

use std::collections::HashMap;

use crate::error::FsckError;
use crate::tree::BlockSource;

/// One pending CoW write: the original block's bytenr, its replacement
/// bytenr, and the new block's bytes.
struct PendingWrite {
    new_bytenr: u64,
    devid: u64,
    physical: u64,
    buf: Vec<u8>,
}

/// Accumulates repair writes and commits them as a unit.
///
/// `next_bytenr` is a caller-supplied allocator for new block addresses;
/// production wires it to the free-space tree, tests can hand it a
/// simple bump allocator.
pub struct Transaction<'a, B: BlockSource> {
    source: &'a mut B,
    pending: Vec<PendingWrite>,
    remaps: HashMap<u64, u64>,
    committed: bool,
}

impl<'a, B: BlockSource> Transaction<'a, B> {
    pub fn new(source: &'a mut B) -> Self {
        Transaction { source, pending: Vec::new(), remaps: HashMap::new(), committed: false }
    }

    /// Stage a CoW'd replacement for `old_bytenr`. `devid`/`physical` are
    /// the already-translated destination for `new_bytenr` (the caller
    /// resolves this through the chunk map before staging).
    pub fn stage_write(&mut self, old_bytenr: u64, new_bytenr: u64, devid: u64, physical: u64, buf: Vec<u8>) {
        self.remaps.insert(old_bytenr, new_bytenr);
        self.pending.push(PendingWrite { new_bytenr, devid, physical, buf });
    }

    /// Bytenr a block will have after commit, if it was staged this
    /// transaction (used to fix up parent pointers before committing).
    pub fn remapped(&self, old_bytenr: u64) -> Option<u64> {
        self.remaps.get(&old_bytenr).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Write every staged block. Stops at the first I/O failure and
    /// returns it — partially-written blocks are unreferenced garbage
    /// since nothing pointed at their bytenrs until a parent pointer
    /// update (staged separately) also commits.
    pub fn commit(mut self) -> Result<(), FsckError> {
        for write in &self.pending {
            self.source.write_physical(write.devid, write.physical, &write.buf)?;
        }
        self.committed = true;
        Ok(())
    }
}

impl<'a, B: BlockSource> Drop for Transaction<'a, B> {
    fn drop(&mut self) {
        if !self.committed && !self.pending.is_empty() {
            log::warn!("dropping {} uncommitted repair write(s)", self.pending.len());
        }
    }
}
