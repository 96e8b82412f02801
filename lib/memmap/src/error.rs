//! The memory map's unified error taxonomy.

use addr::Address;
use store::StoreError;

use crate::BlockId;

/// Every way a memory map operation can fail.
///
/// Variants are grouped by condition rather than by call site, per §7 of the design: a caller can
/// match on *why* an operation failed without needing to know which method produced the error.
#[derive(Debug, thiserror::Error)]
pub enum MemoryMapError {
    /// The requested write would overlap a decoded instruction, or the target address is not
    /// covered by any block.
    #[error("access to {0:?} is denied")]
    AccessDenied(Address),
    /// A new or moved block would intersect existing coverage, or would span the program's image
    /// base.
    #[error("range starting at {start:?} with length {length} conflicts with existing coverage")]
    RangeConflict {
        /// The first address of the conflicting range.
        start: Address,
        /// The length, in addresses, of the conflicting range.
        length: u64,
    },
    /// An address computation exceeded the legal offsets of its space.
    #[error("address arithmetic starting at {start:?} with length {length} overflows its space")]
    Overflow {
        /// The first address of the computation that overflowed.
        start: Address,
        /// The length, in addresses, that was being added.
        length: u64,
    },
    /// An overlay space with the requested name already exists.
    #[error("an overlay space named {0:?} already exists")]
    DuplicateName(String),
    /// The requested operation is not legal for this block's kind.
    #[error("{operation} is not supported on {kind:?} blocks")]
    InvalidKind {
        /// The name of the attempted operation.
        operation: &'static str,
        /// The block kind that rejected it.
        kind: store::BlockKind,
    },
    /// The calling thread does not hold the map's program lock.
    #[error("caller does not hold exclusive access to the memory map")]
    LockViolation,
    /// The given block is not a member of this map.
    #[error("block {0:?} is not a member of this memory map")]
    NotFound(BlockId),
    /// A caller-supplied monitor cancelled the operation before it completed.
    #[error("the operation was cancelled")]
    Cancelled,
    /// The underlying block store reported an I/O failure.
    #[error("block store failure: {0}")]
    Store(#[from] StoreError),
    /// The operation is forbidden while a live-memory handler is installed.
    #[error("operation forbidden while live memory is active")]
    StateConflict,
    /// `get_bytes`/`get_byte` could not read any bytes at all from a covered request.
    #[error("no bytes could be read starting at {0:?}")]
    MemoryAccess(Address),
}
