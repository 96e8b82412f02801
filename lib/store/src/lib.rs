//! The persisted representation of blocks, and the adapter trait that reads and writes it.
#![warn(missing_docs)]

mod error;
mod memory_store;
mod record;
mod stream;

pub use error::StoreError;
pub use memory_store::InMemoryBlockStore;
pub use record::{BlockKind, BlockRecord, Permissions};
pub use stream::{ByteStream, ConstantByteStream, MonitoredByteStream, Monitor, NeverCancelled, SliceByteStream};

use addr::Address;

/// A unique, adapter-assigned identity for a persisted block.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Wraps a raw identity assigned by a [`BlockStore`].
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identity wrapped by this [`BlockId`].
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A request to create a new block record, independent of which [`BlockStore`] will persist it.
#[derive(Debug)]
pub struct NewBlock<'a> {
    /// The kind of block to create.
    pub kind: BlockKind,
    /// The block's display name.
    pub name: String,
    /// The first address the block occupies.
    pub start: Address,
    /// The number of addresses the block occupies.
    pub length: u64,
    /// For bit- and byte-mapped blocks, the address the block forwards to.
    pub mapping_target: Option<Address>,
    /// Whether the block should be created with backing bytes allocated (Default/Overlay only).
    pub initialized: bool,
    /// The block's access permissions.
    pub permissions: Permissions,
    /// An optional source of initial byte content; `None` means zero-fill.
    pub fill: Option<&'a mut dyn ByteStream>,
}

/// Persists [`BlockRecord`]s and the backing bytes of initialized blocks.
///
/// Every method here is expected to be called with the memory map's program lock already held;
/// implementations do not need to provide their own cross-call atomicity, only single-call
/// correctness and interior mutability for the byte storage itself.
///
/// # Errors
///
/// Every fallible method returns a [`StoreError`] on I/O or consistency failure.
pub trait BlockStore: Send {
    /// Returns every persisted block record, sorted ascending by `start` within each space.
    fn load_all(&mut self) -> Result<Vec<BlockRecord>, StoreError>;

    /// Re-reads persisted state from the backing medium, discarding any cached view.
    fn refresh(&mut self) -> Result<(), StoreError>;

    /// Persists a new block record and, for initialized Default/Overlay blocks, its backing
    /// bytes.
    fn create_block(&mut self, request: NewBlock<'_>) -> Result<BlockRecord, StoreError>;

    /// Deletes a persisted block record and its backing bytes, if any.
    fn delete(&mut self, id: BlockId) -> Result<(), StoreError>;

    /// Overwrites a persisted block record in place (its `id` is unchanged).
    fn update(&mut self, record: BlockRecord) -> Result<(), StoreError>;

    /// Reads up to `dst.len()` backing bytes of block `id` starting at `offset`, returning the
    /// number of bytes actually read.
    fn read(&mut self, id: BlockId, offset: u64, dst: &mut [u8]) -> Result<usize, StoreError>;

    /// Writes `src` into block `id`'s backing bytes starting at `offset`.
    fn write(&mut self, id: BlockId, offset: u64, src: &[u8]) -> Result<(), StoreError>;
}
