use thiserror::Error;

/// Errors produced while checking or repairing a filesystem image.
///
/// Leaf routines return one of these directly. Tree walkers OR per-item
/// bits into a running bitmask and keep going so a single session reports
/// as much as it can; only [`FsckError::Fatal`] aborts outright.
#[derive(Error, Debug)]
pub enum FsckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic number in {0}")]
    BadMagic(&'static str),
    #[error("parse error: {0}")]
    Parse(&'static str),
    #[error("checksum mismatch in {0}")]
    CrcMismatch(&'static str),
    /// On-disk structure violates an invariant in a way that is not
    /// repairable locally (header fsid mismatch, corrupt chunk tree, ...).
    #[error("corrupt: {0}")]
    Corrupt(&'static str),
    /// A repairable discrepancy, tagged with the specific error bit(s)
    /// from the fs-tree or extent-graph taxonomies.
    #[error("inconsistent: {0}")]
    Inconsistent(&'static str),
    /// A repair action committed a transaction; the caller must restart
    /// the enclosing scan because CoW may have invalidated cached blocks.
    #[error("repair committed, scan must restart")]
    Again,
    /// The device appears mounted and `--force` was not given.
    #[error("device busy (appears mounted)")]
    Busy,
    /// A feature bit the checker does not implement (e.g. mixed block
    /// groups during extent-tree reinit, non-CRC32C checksum algorithms).
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// Unrecoverable programming or allocation error; the caller should
    /// exit immediately without attempting further repairs.
    #[error("fatal: {0}")]
    Fatal(&'static str),
    /// Interval already present in an [`crate::cache::ExtentCache`].
    #[error("interval already present in cache")]
    AlreadyPresent,
}

impl FsckError {
    /// Whether this error should abort the enclosing transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsckError::Fatal(_))
    }
}
