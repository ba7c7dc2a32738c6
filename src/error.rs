/// Errors returned by the containers in this crate.
///
/// Every operation that may allocate reports allocator exhaustion through
/// [`Error::AllocFailed`] instead of aborting. A container that returns an
/// error is left exactly as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The allocator could not provide a block for the requested layout.
    #[error("allocation of {size} bytes (align {align}) failed")]
    AllocFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// The requested capacity cannot be represented as a valid layout.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// `emplace` was called with a key that is already present.
    #[error("key {0} already exists")]
    KeyAlreadyExists(u64),

    /// The key is not present in the table.
    #[error("key {0} not found")]
    KeyNotFound(u64),

    /// The slot does not hold a live element.
    #[error("slot {0} is not occupied")]
    SlotNotOccupied(usize),

    /// The slot already holds a live element.
    #[error("slot {0} is already occupied")]
    SlotOccupied(usize),

    /// The snapshot ended before a complete table could be read.
    #[error("snapshot truncated")]
    Truncated,

    /// The snapshot is malformed.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
