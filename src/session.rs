//! Per-run context threaded through the call graph.
//!
//! Replaces the original's module-level globals (`bytes_used`,
//! `total_csum_bytes`, `duplicate_extents`, `delete_items`, `no_holes`,
//! repair mode, mode flag) with a single value owned by the caller (§9
//! DESIGN NOTES).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Which fs-tree checker variant is driving C5/C6 (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Whole-graph-in-memory: minimizes I/O, costs memory.
    Original,
    /// Streams each inode, re-querying the tree for cross-references.
    Lowmem,
}

/// Aggregate statistics accumulated over one checking session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_used: AtomicU64,
    pub total_csum_bytes: AtomicU64,
    pub duplicate_extents: AtomicU64,
    pub delete_items: AtomicU64,
    pub errors_found: AtomicU64,
    pub errors_repaired: AtomicU64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            bytes_used: self.bytes_used.load(Ordering::Relaxed),
            total_csum_bytes: self.total_csum_bytes.load(Ordering::Relaxed),
            duplicate_extents: self.duplicate_extents.load(Ordering::Relaxed),
            delete_items: self.delete_items.load(Ordering::Relaxed),
            errors_found: self.errors_found.load(Ordering::Relaxed),
            errors_repaired: self.errors_repaired.load(Ordering::Relaxed),
        }
    }
}

/// A plain-value copy of [`SessionStats`] for reporting (§8 S1: "found X
/// bytes used, no error found").
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStatsSnapshot {
    pub bytes_used: u64,
    pub total_csum_bytes: u64,
    pub duplicate_extents: u64,
    pub delete_items: u64,
    pub errors_found: u64,
    pub errors_repaired: u64,
}

/// Context shared by every component (C1–C7) during one invocation.
///
/// Holds the statistics and feature flags that the original kept as
/// module-level mutables, plus the cooperative-cancellation flag an
/// optional progress-reporter thread or signal handler can set (§5).
pub struct Session {
    pub mode: CheckMode,
    pub repair: bool,
    pub no_holes: bool,
    pub check_data_csum: bool,
    pub force: bool,
    pub stats: SessionStats,
    cancelled: AtomicBool,
}

impl Session {
    pub fn new(mode: CheckMode, repair: bool) -> Self {
        Session {
            mode,
            repair,
            no_holes: false,
            check_data_csum: false,
            force: false,
            stats: SessionStats::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Whether repair may run for the given error bitmask: repairs
    /// execute only when the bitmask is non-zero AND `--repair` is set
    /// (§7).
    pub fn should_repair(&self, error_bits_nonzero: bool) -> bool {
        self.repair && error_bits_nonzero
    }

    /// Request cooperative cancellation; polled between top-level tree
    /// iterations, never mid-transaction (§5).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn record_bytes_used(&self, n: u64) {
        self.stats.bytes_used.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_csum_bytes(&self, n: u64) {
        self.stats.total_csum_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_duplicate_extent(&self) {
        self.stats.duplicate_extents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete_item(&self) {
        self.stats.delete_items.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_found(&self) {
        self.stats.errors_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_repaired(&self) {
        self.stats.errors_repaired.fetch_add(1, Ordering::Relaxed);
    }
}
