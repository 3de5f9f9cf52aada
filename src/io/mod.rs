//! Direct-I/O engine and device-set abstraction (§6 "Block device I/O").

pub mod aligned_buf;
pub mod device;
pub mod engine;
pub mod platform;
pub mod reader;

use std::fmt;

use crate::error::FsckError;

pub use device::DeviceSet;
pub use engine::{DiskProfile, IoEngine, detect_disk_profile_for_path};

/// Which part of a check/repair session an I/O belongs to, for CSV
/// logging and for prioritizing readahead (sequential within a phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    Superblock,
    ChunkTree,
    DeviceTree,
    ExtentTree,
    FsTree,
    Qgroup,
    Repair,
    Unknown,
}

impl fmt::Display for IoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoPhase::Superblock => "superblock",
            IoPhase::ChunkTree => "chunk_tree",
            IoPhase::DeviceTree => "device_tree",
            IoPhase::ExtentTree => "extent_tree",
            IoPhase::FsTree => "fs_tree",
            IoPhase::Qgroup => "qgroup",
            IoPhase::Repair => "repair",
            IoPhase::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Minimal read interface an [`IoEngine`] and its decorators
/// ([`reader::MaybeInstrumented`]) implement.
pub trait IoReader {
    fn read_at(&mut self, offset: u64, len: usize, phase: IoPhase) -> Result<&[u8], FsckError>;

    fn coalesced_read_batch<T: Copy, F>(
        &mut self,
        requests: &[(u64, usize, T)],
        on_complete: F,
        phase: IoPhase,
    ) -> Result<(), FsckError>
    where
        F: FnMut(&[u8], T) -> Result<(), FsckError>;
}
