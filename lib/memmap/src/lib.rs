//! The Memory Map core of a program analysis database.
//!
//! Models the address space of an analyzed binary as a sorted, non-overlapping set of named,
//! typed [`Block`]s, resolves addresses to their containing block in logarithmic time with a
//! single-slot recency cache, computes the effective initialized coverage across blocks mapped
//! onto other blocks, and provides endian-aware typed I/O and masked byte-pattern search over the
//! whole block set.
//!
//! [`MemoryMap`] is the entry point. It is built over four collaborators it only ever calls
//! through traits, each with a minimal in-process reference implementation for tests and simple
//! embedders: [`store::BlockStore`] persists block records and backing bytes,
//! [`AddressFactory`] resolves and allocates address spaces, [`CodeManager`] is consulted to
//! reject writes that would corrupt decoded instructions, and [`ChangeBus`] receives a
//! notification after every successful mutation. An optional [`LiveMemoryHandler`] can
//! short-circuit all block-backed I/O to a running target.
#![warn(missing_docs)]

mod block;
mod code;
pub mod config;
mod error;
mod events;
mod factory;
mod live;
mod map;
mod search;
mod snapshot;

pub use block::Block;
pub use code::{CodeManager, Instruction, NullCodeManager};
pub use error::MemoryMapError;
pub use events::{ChangeBus, ChangeEvent, ChannelChangeBus, NullChangeBus};
pub use factory::{AddressFactory, InMemoryAddressFactory};
pub use live::{LiveMemoryHandler, LiveMemoryListener};
pub use map::MemoryMap;

pub use addr::{Address, AddressRange, AddressSet, AddressSpaceDescriptor, AddressSpaceId, AddressSpaceKind};
pub use endian::Endian;
pub use store::{
    BlockId, BlockKind, BlockStore, ByteStream, ConstantByteStream, InMemoryBlockStore, MonitoredByteStream, Monitor,
    NeverCancelled, NewBlock, Permissions, SliceByteStream, StoreError,
};
