//! Errors produced by a [`crate::BlockStore`].

use crate::BlockId;

/// An error reported by a [`crate::BlockStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No block with the given identity exists in the store.
    #[error("no block with id {0:?} exists in the store")]
    NotFound(BlockId),
    /// The requested byte range lies outside the block's backing storage.
    #[error("offset {offset} with length {len} is out of range for block {id:?}")]
    OutOfRange {
        /// The block whose bytes were being accessed.
        id: BlockId,
        /// The requested starting offset within the block.
        offset: u64,
        /// The requested byte count.
        len: usize,
    },
    /// The block has no backing bytes to read or write (uninitialized, or bit/byte-mapped).
    #[error("block {0:?} has no backing bytes")]
    NoBackingBytes(BlockId),
    /// An underlying I/O failure occurred while persisting or reading state.
    #[error("I/O failure in block store: {0}")]
    Io(#[from] std::io::Error),
    /// A caller-supplied [`crate::Monitor`] cancelled an in-progress byte stream read.
    #[error("the operation was cancelled")]
    Cancelled,
    /// A block's declared length does not fit in this host's `usize`.
    #[error("length {0} does not fit in this host's address space")]
    LengthOverflow(u64),
}
