//! The memory map itself: block membership, lookup, coverage, mutators, and typed I/O.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use addr::{Address, AddressRange, AddressSet, AddressSpaceKind};
use endian::Endian;
use store::{
    BlockId, BlockKind, BlockStore, ByteStream, Monitor, MonitoredByteStream, NewBlock, Permissions, SliceByteStream,
};
use sync::ReentrantLock;

use crate::block::Block;
use crate::code::CodeManager;
use crate::config;
use crate::events::{ChangeBus, ChangeEvent};
use crate::factory::AddressFactory;
use crate::live::LiveMemoryHandler;
use crate::snapshot::Snapshot;
use crate::MemoryMapError;

/// Sentinel `last_block` value meaning "the recency cache is empty".
const NO_BLOCK: u32 = u32::MAX;

/// Clamps `requested` to what a mapped block of `block_length` (bytes or bits, matching
/// `offset`'s unit) still has left past `offset`, per §4.7: a mapped block must never forward
/// more than its own declared length, even when the target it forwards to is larger.
fn clamp_to_remaining(requested: usize, block_length: u64, offset: u64) -> usize {
    let remaining = block_length.saturating_sub(offset);
    let cap = conversion::u64_to_usize_checked(remaining).unwrap_or(requested);
    requested.min(cap)
}

/// The state only a mutator touches, serialized by [`MemoryMap::inner`].
///
/// `inner`'s guard only ever hands out a shared `&Inner` (see [`sync::ReentrantGuard`]'s `Deref`),
/// so every field that a mutator needs to mutate is wrapped in its own interior-mutability cell.
/// That also means holding two guards on the same thread (legal, since the lock is reentrant)
/// cannot produce aliasing `&mut` references: each `borrow_mut()` is checked independently.
struct Inner {
    /// Persists block records and backing bytes.
    store: RefCell<Box<dyn BlockStore>>,
    /// Resolves and allocates address spaces.
    factory: RefCell<Box<dyn AddressFactory>>,
    /// Consulted to reject writes that would corrupt decoded instructions.
    code_manager: RefCell<Box<dyn CodeManager>>,
    /// Receives a notification after every successful mutation.
    change_bus: RefCell<Box<dyn ChangeBus>>,
    /// The program's image base, if known; blocks in the default space may not span it (I7).
    image_base: Cell<Option<Address>>,
}

/// The address-space model of an analyzed binary: a sorted, non-overlapping set of named,
/// typed blocks, with coherent typed read/write access across them.
///
/// See the crate-level design notes for the concurrency model. In short: every public mutator
/// and every multi-step read holds `inner` (the reentrant "program lock") for its duration;
/// `snapshot` is swapped once per mutation and cloned cheaply by lock-free-feeling readers that
/// don't need `inner` at all (`get_block`, `contains`, `blocks`, the coverage-set getters).
pub struct MemoryMap {
    /// Mutator-only state, serialized by a reentrant lock.
    inner: ReentrantLock<Inner>,
    /// The most recently published view of the block set and its coverage sets.
    snapshot: RwLock<Arc<Snapshot>>,
    /// The recency cache: the id of the block that most recently answered a lookup.
    last_block: AtomicU32,
    /// The optional live-memory override; when present, supersedes block-backed I/O entirely.
    live: Mutex<Option<Box<dyn LiveMemoryHandler>>>,
    /// The program's default byte order, used when a typed read/write does not override it.
    endian: Endian,
}

impl MemoryMap {
    /// Opens a memory map over `store`'s currently persisted blocks.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::Store`] if the initial load fails.
    pub fn open(
        store: Box<dyn BlockStore>,
        factory: Box<dyn AddressFactory>,
        code_manager: Box<dyn CodeManager>,
        change_bus: Box<dyn ChangeBus>,
        endian: Endian,
    ) -> Result<Self, MemoryMapError> {
        let map = Self {
            inner: ReentrantLock::new(Inner {
                store: RefCell::new(store),
                factory: RefCell::new(factory),
                code_manager: RefCell::new(code_manager),
                change_bus: RefCell::new(change_bus),
                image_base: Cell::new(None),
            }),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            last_block: AtomicU32::new(NO_BLOCK),
            live: Mutex::new(None),
            endian,
        };

        {
            let guard = map.inner.lock();
            map.rebuild(guard.store.borrow_mut().as_mut())?;
        }
        Ok(map)
    }

    /// Discards the adapter's cached view and re-derives the block set and coverage sets from
    /// whatever it re-reads from the backing medium (§4.1, §4.5).
    ///
    /// Used after an external change to the persisted records (e.g. another process wrote to the
    /// same project) or after a store-format upgrade; ordinary in-process mutations already call
    /// [`Self::rebuild`] themselves and have no need to call this.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::Store`] if the adapter's refresh or reload fails.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&self) -> Result<(), MemoryMapError> {
        let guard = self.inner.lock();
        guard.store.borrow_mut().refresh()?;
        self.rebuild(guard.store.borrow_mut().as_mut())
    }

    /// Sets the program's image base, used to enforce I7 for future block creation.
    pub fn set_image_base(&self, base: Option<Address>) {
        let guard = self.inner.lock();
        guard.image_base.set(base);
    }

    /// Installs a live-memory handler, superseding block-backed I/O until removed.
    pub fn set_live_memory_handler(&self, handler: Box<dyn LiveMemoryHandler>) {
        *self.live.lock().expect("live memory mutex poisoned") = Some(handler);
    }

    /// Removes any installed live-memory handler, reverting to block-backed I/O.
    pub fn clear_live_memory_handler(&self) {
        *self.live.lock().expect("live memory mutex poisoned") = None;
    }

    /// Returns `true` if a live-memory handler is currently installed.
    pub fn is_live(&self) -> bool {
        self.live.lock().expect("live memory mutex poisoned").is_some()
    }

    /// Returns a clone of the most recently published snapshot.
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Reloads `blocks`, `block_by_id`, and every coverage set from `store`, publishing a fresh
    /// [`Snapshot`] and invalidating the recency cache (§4.5).
    ///
    /// Must be called with `inner` already locked; `store` is the same store that guard owns.
    fn rebuild(&self, store: &mut dyn BlockStore) -> Result<(), MemoryMapError> {
        let records = store.load_all()?;
        let blocks: Vec<Block> = records.into_iter().map(Block::from_record).collect();
        let count = blocks.len();
        let snapshot = Arc::new(Snapshot::build(blocks));

        *self.snapshot.write().expect("snapshot lock poisoned") = snapshot;
        self.last_block.store(NO_BLOCK, Ordering::Relaxed);
        tracing::debug!(blocks = count, "rebuild completed");
        Ok(())
    }

    /// Resolves `addr` to its containing block, consulting the recency cache first (§4.3).
    pub fn get_block(&self, addr: Address) -> Option<Block> {
        let snapshot = self.snapshot();

        let cached = self.last_block.load(Ordering::Relaxed);
        if cached != NO_BLOCK {
            if let Some(block) = snapshot.by_id(BlockId::from_raw(cached)) {
                if block.contains(addr) {
                    return Some(block.clone());
                }
            }
        }

        let (_, block) = snapshot.lookup(addr)?;
        self.last_block.store(block.id().raw(), Ordering::Relaxed);
        Some(block.clone())
    }

    /// Returns the block named `name`, if any.
    pub fn get_block_by_name(&self, name: &str) -> Option<Block> {
        self.snapshot().by_name(name).cloned()
    }

    /// Returns `true` if any block covers `addr`.
    pub fn contains(&self, addr: Address) -> bool {
        self.snapshot().addr_set.contains(addr)
    }

    /// Returns every block, in ascending `start` order (the map's sole iteration order).
    pub fn blocks(&self) -> Vec<Block> {
        self.snapshot().blocks.clone()
    }

    /// Returns the union of every block's range.
    pub fn addr_set(&self) -> AddressSet {
        self.snapshot().addr_set.clone()
    }

    /// Returns the union of ranges that are initialized or mapped-to-initialized.
    ///
    /// When a live-memory handler is installed, this collapses to `addr_set` (§6, §9): the
    /// running target is assumed to have some value at every address it covers, without
    /// mutating the underlying coverage sets.
    pub fn all_initialized_set(&self) -> AddressSet {
        let snapshot = self.snapshot();
        if self.is_live() {
            return snapshot.addr_set.clone();
        }
        snapshot.all_initialized_set.clone()
    }

    /// Returns `all_initialized_set` restricted to loaded blocks.
    ///
    /// See [`Self::all_initialized_set`] for the live-memory collapse.
    pub fn loaded_initialized_set(&self) -> AddressSet {
        let snapshot = self.snapshot();
        if self.is_live() {
            return snapshot.addr_set.clone();
        }
        snapshot.loaded_initialized_set.clone()
    }

    /// Validates a candidate block range against I6-I8 and non-overlap with existing coverage,
    /// returning the range's inclusive end on success.
    fn validate_new_range(
        snapshot: &Snapshot,
        factory: &dyn AddressFactory,
        image_base: Option<Address>,
        require_memory_space: bool,
        start: Address,
        length: u64,
        max_len: u64,
    ) -> Result<Address, MemoryMapError> {
        if length == 0 || length > max_len {
            return Err(MemoryMapError::RangeConflict { start, length });
        }

        let end = start.checked_add(length - 1).ok_or(MemoryMapError::Overflow { start, length })?;

        if require_memory_space && !matches!(factory.kind(start.space()), Some(AddressSpaceKind::Memory)) {
            return Err(MemoryMapError::RangeConflict { start, length });
        }

        if let Some(descriptor) = factory.descriptor(start.space()) {
            if !descriptor.is_valid_range(start.offset(), end.offset()) {
                return Err(MemoryMapError::Overflow { start, length });
            }
        }

        if start.space() == factory.default_space() {
            if let Some(base) = image_base {
                if base.offset() > start.offset() && base.offset() <= end.offset() {
                    return Err(MemoryMapError::RangeConflict { start, length });
                }
            }
        }

        let new_range = AddressRange::new(start, length);
        if snapshot.addr_set.ranges_in(start.space()).any(|r| r.overlaps(new_range)) {
            return Err(MemoryMapError::RangeConflict { start, length });
        }

        if snapshot.addr_set.num_addresses() + length > config::MAX_BINARY_SIZE {
            return Err(MemoryMapError::RangeConflict { start, length });
        }

        Ok(end)
    }

    /// Validates a mapped block's target range (I6): it must not overflow its space.
    fn validate_target_range(factory: &dyn AddressFactory, target: Address, span: u64) -> Result<(), MemoryMapError> {
        if span == 0 {
            return Ok(());
        }

        let end = target
            .checked_add(span - 1)
            .ok_or(MemoryMapError::Overflow { start: target, length: span })?;

        if let Some(descriptor) = factory.descriptor(target.space()) {
            if !descriptor.is_valid_range(target.offset(), end.offset()) {
                return Err(MemoryMapError::Overflow { start: target, length: span });
            }
        }

        Ok(())
    }

    /// Resolves an optional start address into an overlay space, rewriting it there.
    ///
    /// Returns `(start, require_memory_space)`: when `overlay_name` is `Some`, a fresh overlay
    /// space shadowing `start.space()` is created and `start` is rewritten into it.
    fn resolve_overlay(
        inner: &Inner,
        start: Address,
        overlay_name: Option<&str>,
    ) -> Result<(Address, bool), MemoryMapError> {
        match overlay_name {
            Some(name) => {
                let overlay_space = inner.factory.borrow_mut().create_overlay_space(name, start.space())?;
                Ok((Address::new(overlay_space, start.offset()), false))
            }
            None => Ok((start, true)),
        }
    }

    /// Creates a new Default or Overlay block, initialized from `fill` (or zero-filled if
    /// absent).
    ///
    /// # Errors
    ///
    /// Returns an error per §7 if the range conflicts with existing coverage, overflows its
    /// space, spans the image base, or a caller-supplied `monitor` cancels mid-fill.
    #[tracing::instrument(skip(self, fill, monitor), fields(name))]
    pub fn create_initialized_block(
        &self,
        name: &str,
        start: Address,
        length: u64,
        permissions: Permissions,
        fill: Option<&mut dyn ByteStream>,
        overlay_name: Option<&str>,
        monitor: Option<&dyn Monitor>,
    ) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();

        let (start, require_memory_space) = Self::resolve_overlay(&guard, start, overlay_name)?;
        let kind = if overlay_name.is_some() { BlockKind::Overlay } else { BlockKind::Default };

        Self::validate_new_range(
            &snapshot,
            guard.factory.borrow().as_ref(),
            guard.image_base.get(),
            require_memory_space,
            start,
            length,
            config::MAX_INITIALIZED_BLOCK_SIZE,
        )?;

        let mut monitored_holder: Option<MonitoredByteStream<'_, dyn Monitor>> = None;
        let fill_stream: Option<&mut dyn ByteStream> = match (fill, monitor) {
            (Some(stream), Some(m)) => {
                monitored_holder = Some(MonitoredByteStream::new(stream, m));
                monitored_holder.as_mut().map(|s| s as &mut dyn ByteStream)
            }
            (other, _) => other,
        };

        let record = guard
            .store
            .borrow_mut()
            .create_block(NewBlock {
                kind,
                name: name.to_string(),
                start,
                length,
                mapping_target: None,
                initialized: true,
                permissions,
                fill: fill_stream,
            })
            .inspect_err(|error| tracing::warn!(%error, "block store rejected block creation"))
            .map_err(|error| match error {
                store::StoreError::Cancelled => MemoryMapError::Cancelled,
                other => MemoryMapError::Store(other),
            })?;

        self.rebuild(guard.store.borrow_mut().as_mut())?;
        let block = Block::from_record(record);
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockAdded {
            id: block.id(),
            range: block.range(),
        });
        Ok(block)
    }

    /// Creates a new Default or Overlay block with no backing bytes.
    ///
    /// # Errors
    ///
    /// See [`Self::create_initialized_block`].
    pub fn create_uninitialized_block(
        &self,
        name: &str,
        start: Address,
        length: u64,
        permissions: Permissions,
        overlay_name: Option<&str>,
    ) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();

        let (start, require_memory_space) = Self::resolve_overlay(&guard, start, overlay_name)?;
        let kind = if overlay_name.is_some() { BlockKind::Overlay } else { BlockKind::Default };

        Self::validate_new_range(
            &snapshot,
            guard.factory.borrow().as_ref(),
            guard.image_base.get(),
            require_memory_space,
            start,
            length,
            config::MAX_UNINITIALIZED_BLOCK_SIZE,
        )?;

        let record = guard.store.borrow_mut().create_block(NewBlock {
            kind,
            name: name.to_string(),
            start,
            length,
            mapping_target: None,
            initialized: false,
            permissions,
            fill: None,
        })?;

        self.rebuild(guard.store.borrow_mut().as_mut())?;
        let block = Block::from_record(record);
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockAdded {
            id: block.id(),
            range: block.range(),
        });
        Ok(block)
    }

    /// Creates a bit-mapped block: `length` bits, each expanded to a `0x00`/`0x01` byte read from
    /// `target`.
    ///
    /// # Errors
    ///
    /// See [`Self::create_initialized_block`]; additionally rejects a target span that overflows
    /// its space (I6).
    pub fn create_bit_mapped_block(
        &self,
        name: &str,
        start: Address,
        length: u64,
        target: Address,
        permissions: Permissions,
    ) -> Result<Block, MemoryMapError> {
        self.create_mapped_block(name, start, length, target, permissions, BlockKind::BitMapped)
    }

    /// Creates a byte-mapped block: `length` bytes forwarded one-to-one from `target`.
    ///
    /// # Errors
    ///
    /// See [`Self::create_bit_mapped_block`].
    pub fn create_byte_mapped_block(
        &self,
        name: &str,
        start: Address,
        length: u64,
        target: Address,
        permissions: Permissions,
    ) -> Result<Block, MemoryMapError> {
        self.create_mapped_block(name, start, length, target, permissions, BlockKind::ByteMapped)
    }

    /// Shared implementation of [`Self::create_bit_mapped_block`] and
    /// [`Self::create_byte_mapped_block`].
    fn create_mapped_block(
        &self,
        name: &str,
        start: Address,
        length: u64,
        target: Address,
        permissions: Permissions,
        kind: BlockKind,
    ) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();

        Self::validate_new_range(
            &snapshot,
            guard.factory.borrow().as_ref(),
            guard.image_base.get(),
            false,
            start,
            length,
            config::MAX_UNINITIALIZED_BLOCK_SIZE,
        )?;

        let span = match kind {
            BlockKind::BitMapped => length.div_ceil(8),
            BlockKind::ByteMapped => length,
            BlockKind::Default | BlockKind::Overlay => unreachable!("create_mapped_block is only called for mapped kinds"),
        };
        Self::validate_target_range(guard.factory.borrow().as_ref(), target, span)?;

        let record = guard.store.borrow_mut().create_block(NewBlock {
            kind,
            name: name.to_string(),
            start,
            length,
            mapping_target: Some(target),
            initialized: false,
            permissions,
            fill: None,
        })?;

        self.rebuild(guard.store.borrow_mut().as_mut())?;
        let block = Block::from_record(record);
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockAdded {
            id: block.id(),
            range: block.range(),
        });
        Ok(block)
    }

    /// Moves `block` to `new_start`, asking the code manager to migrate cross-references.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::StateConflict`] if live memory is active,
    /// [`MemoryMapError::InvalidKind`] if `block` is an Overlay block or `new_start` lies in an
    /// overlay space, or [`MemoryMapError::RangeConflict`]/[`MemoryMapError::Overflow`] if the
    /// destination is illegal.
    pub fn move_block(&self, id: BlockId, new_start: Address) -> Result<Block, MemoryMapError> {
        if self.is_live() {
            return Err(MemoryMapError::StateConflict);
        }

        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let block = snapshot.by_id(id).ok_or(MemoryMapError::NotFound(id))?.clone();

        if block.kind() == BlockKind::Overlay {
            return Err(MemoryMapError::InvalidKind {
                operation: "move",
                kind: block.kind(),
            });
        }
        if matches!(guard.factory.borrow().kind(new_start.space()), Some(AddressSpaceKind::Overlay { .. })) {
            return Err(MemoryMapError::InvalidKind {
                operation: "move to overlay space",
                kind: block.kind(),
            });
        }

        let end = new_start
            .checked_add(block.length() - 1)
            .ok_or(MemoryMapError::Overflow { start: new_start, length: block.length() })?;
        let destination = AddressRange::new(new_start, block.length());
        let mut other_coverage = snapshot.addr_set.clone();
        other_coverage.remove(block.range());
        let conflicts = other_coverage.ranges_in(new_start.space()).any(|r| r.overlaps(destination));
        if conflicts {
            return Err(MemoryMapError::RangeConflict {
                start: new_start,
                length: block.length(),
            });
        }

        let old_range = block.range();
        let mut record = block.to_record();
        record.start = new_start;
        guard.store.borrow_mut().update(record)?;
        self.rebuild(guard.store.borrow_mut().as_mut())?;

        guard.code_manager.borrow_mut().memory_changed(old_range);
        guard.code_manager.borrow_mut().memory_changed(AddressRange::from_inclusive(new_start, end));
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockMoved {
            id,
            old_start: old_range.start(),
            new_start,
        });

        Ok(self.snapshot().by_id(id).expect("just-moved block is a member").clone())
    }

    /// Splits `block` into `[start, at)` and `[at, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::StateConflict`] if live memory is active,
    /// [`MemoryMapError::InvalidKind`] if the block cannot be split (Overlay, BitMapped, or
    /// ByteMapped), or [`MemoryMapError::RangeConflict`] if `at` does not lie strictly inside the
    /// block.
    pub fn split(&self, id: BlockId, at: Address) -> Result<(Block, Block), MemoryMapError> {
        if self.is_live() {
            return Err(MemoryMapError::StateConflict);
        }

        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let block = snapshot.by_id(id).ok_or(MemoryMapError::NotFound(id))?.clone();

        if block.kind() != BlockKind::Default {
            return Err(MemoryMapError::InvalidKind {
                operation: "split",
                kind: block.kind(),
            });
        }
        if at.space() != block.start().space() || at.offset() <= block.start().offset() || at.offset() > block.end().offset()
        {
            return Err(MemoryMapError::RangeConflict {
                start: at,
                length: 0,
            });
        }

        let (lower, upper) = block.range().split_at(at).expect("bounds already validated");

        let mut upper_bytes = vec![0u8; conversion::u64_to_usize_checked(upper.count()).unwrap_or(0)];
        if block.is_initialized() {
            guard.store.borrow_mut().read(block.id(), lower.count(), &mut upper_bytes)?;
        }

        let mut record = block.to_record();
        record.length = lower.count();
        guard.store.borrow_mut().update(record)?;

        let mut stream = SliceByteStream::new(&upper_bytes);
        let new_record = guard.store.borrow_mut().create_block(NewBlock {
            kind: BlockKind::Default,
            name: format!("{}.split", block.name()),
            start: at,
            length: upper.count(),
            mapping_target: None,
            initialized: block.is_initialized(),
            permissions: block.permissions(),
            fill: block.is_initialized().then_some(&mut stream as &mut dyn ByteStream),
        })?;

        self.rebuild(guard.store.borrow_mut().as_mut())?;
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockSplit {
            original: id,
            new: new_record.id,
            at,
        });

        let snapshot = self.snapshot();
        let original = snapshot.by_id(id).expect("original survives a split").clone();
        let new_block = snapshot.by_id(new_record.id).expect("new half was just created").clone();
        Ok((original, new_block))
    }

    /// Joins two adjacent Default blocks of matching initialization into one.
    ///
    /// The caller need not pre-sort `first`/`second`; this sorts them by `start` itself before
    /// validating adjacency.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::InvalidKind`] if either block is not Default, or
    /// [`MemoryMapError::RangeConflict`] if they are not adjacent, have mismatched
    /// initialization, or their combined length would not fit in 31 bits.
    pub fn join(&self, first: BlockId, second: BlockId) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();

        let a = snapshot.by_id(first).ok_or(MemoryMapError::NotFound(first))?.clone();
        let b = snapshot.by_id(second).ok_or(MemoryMapError::NotFound(second))?.clone();
        let (lower, upper) = if a.start() <= b.start() { (a, b) } else { (b, a) };

        if lower.kind() != BlockKind::Default || upper.kind() != BlockKind::Default {
            return Err(MemoryMapError::InvalidKind {
                operation: "join",
                kind: if lower.kind() != BlockKind::Default { lower.kind() } else { upper.kind() },
            });
        }
        if lower.is_initialized() != upper.is_initialized() {
            return Err(MemoryMapError::RangeConflict {
                start: upper.start(),
                length: upper.length(),
            });
        }
        if !lower.end().is_successor(upper.start()) {
            return Err(MemoryMapError::RangeConflict {
                start: upper.start(),
                length: upper.length(),
            });
        }

        let combined_length = lower.length() + upper.length();
        if combined_length > i32::MAX as u64 {
            return Err(MemoryMapError::RangeConflict {
                start: lower.start(),
                length: combined_length,
            });
        }

        let mut tail_bytes = vec![0u8; conversion::u64_to_usize_checked(upper.length()).unwrap_or(0)];
        if upper.is_initialized() {
            guard.store.borrow_mut().read(upper.id(), 0, &mut tail_bytes)?;
        }

        let mut record = lower.to_record();
        record.length = combined_length;
        guard.store.borrow_mut().update(record)?;

        if lower.is_initialized() {
            guard.store.borrow_mut().write(lower.id(), lower.length(), &tail_bytes)?;
        }

        guard.store.borrow_mut().delete(upper.id())?;
        self.rebuild(guard.store.borrow_mut().as_mut())?;

        guard.change_bus.borrow_mut().post(ChangeEvent::BlocksJoined {
            survivor: lower.id(),
            absorbed: upper.id(),
        });

        Ok(self.snapshot().by_id(lower.id()).expect("survivor remains a member").clone())
    }

    /// Allocates backing bytes for a Default or Overlay block, zero-filled.
    ///
    /// A no-op if the block is already initialized.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::InvalidKind`] for mapped blocks, or
    /// [`MemoryMapError::RangeConflict`] if the block's length exceeds
    /// [`config::MAX_INITIALIZED_BLOCK_SIZE`].
    pub fn convert_to_initialized(&self, id: BlockId) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let block = snapshot.by_id(id).ok_or(MemoryMapError::NotFound(id))?.clone();

        if !matches!(block.kind(), BlockKind::Default | BlockKind::Overlay) {
            return Err(MemoryMapError::InvalidKind {
                operation: "convert to initialized",
                kind: block.kind(),
            });
        }
        if block.is_initialized() {
            return Ok(block);
        }
        if block.length() > config::MAX_INITIALIZED_BLOCK_SIZE {
            return Err(MemoryMapError::RangeConflict {
                start: block.start(),
                length: block.length(),
            });
        }

        let mut record = block.to_record();
        record.initialized = true;
        guard.store.borrow_mut().update(record)?;
        self.rebuild(guard.store.borrow_mut().as_mut())?;

        guard.change_bus.borrow_mut().post(ChangeEvent::BlockChanged { id });
        guard.change_bus.borrow_mut().post(ChangeEvent::BytesChanged { range: block.range() });

        Ok(self.snapshot().by_id(id).expect("converted block remains a member").clone())
    }

    /// Releases a Default or Overlay block's backing bytes, leaving it uninitialized.
    ///
    /// A no-op if the block is already uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::InvalidKind`] for mapped blocks.
    pub fn convert_to_uninitialized(&self, id: BlockId) -> Result<Block, MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let block = snapshot.by_id(id).ok_or(MemoryMapError::NotFound(id))?.clone();

        if !matches!(block.kind(), BlockKind::Default | BlockKind::Overlay) {
            return Err(MemoryMapError::InvalidKind {
                operation: "convert to uninitialized",
                kind: block.kind(),
            });
        }
        if !block.is_initialized() {
            return Ok(block);
        }

        let mut record = block.to_record();
        record.initialized = false;
        guard.store.borrow_mut().update(record)?;
        self.rebuild(guard.store.borrow_mut().as_mut())?;

        guard.change_bus.borrow_mut().post(ChangeEvent::BlockChanged { id });
        guard.change_bus.borrow_mut().post(ChangeEvent::BytesChanged { range: block.range() });

        Ok(self.snapshot().by_id(id).expect("converted block remains a member").clone())
    }

    /// Removes `block` from the map, dropping its overlay space too if that empties it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::NotFound`] if `id` is not a member.
    pub fn remove_block(&self, id: BlockId) -> Result<(), MemoryMapError> {
        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let block = snapshot.by_id(id).ok_or(MemoryMapError::NotFound(id))?.clone();

        guard.store.borrow_mut().delete(id)?;
        self.rebuild(guard.store.borrow_mut().as_mut())?;
        guard.change_bus.borrow_mut().post(ChangeEvent::BlockRemoved {
            id,
            range: block.range(),
        });

        if let Some(AddressSpaceKind::Overlay { .. }) = guard.factory.borrow().kind(block.start().space()) {
            let still_occupied = self.snapshot().blocks.iter().any(|b| b.start().space() == block.start().space());
            if !still_occupied {
                guard.factory.borrow_mut().remove_overlay_space(block.start().space());
            }
        }

        Ok(())
    }

    /// Resolves an `Option<bool>` endian override against the map's program default.
    fn resolve_endian(&self, big_endian: Option<bool>) -> Endian {
        match big_endian {
            Some(true) => Endian::Big,
            Some(false) => Endian::Little,
            None => self.endian,
        }
    }

    /// Reads a single byte starting at `addr`, dispatching to the block (or chain of mapped
    /// blocks) that covers it.
    fn raw_read_at(
        &self,
        snapshot: &Snapshot,
        store: &mut dyn BlockStore,
        addr: Address,
        dst: &mut [u8],
    ) -> Result<usize, MemoryMapError> {
        if dst.is_empty() {
            return Ok(0);
        }

        let Some((_, block)) = snapshot.lookup(addr) else {
            return Ok(0);
        };
        if !block.is_initialized_or_mapped() {
            return Ok(0);
        }

        match block.kind() {
            BlockKind::Default | BlockKind::Overlay => {
                if !block.is_initialized() {
                    return Ok(0);
                }
                let offset = addr.offset() - block.start().offset();
                Ok(store.read(block.id(), offset, dst)?)
            }
            BlockKind::ByteMapped => {
                let Some(overlay_min) = block.mapping_target() else {
                    return Ok(0);
                };
                let off = addr.offset() - block.start().offset();
                // Clamp to what this block itself still covers: the target block is typically
                // larger than the mapped window, and must never supply bytes past `block`'s own
                // end (§4.7: "read as many bytes as that block can supply").
                let limit = clamp_to_remaining(dst.len(), block.length(), off);
                let target = Address::new(overlay_min.space(), overlay_min.offset() + off);
                self.raw_read_at(snapshot, store, target, &mut dst[..limit])
            }
            BlockKind::BitMapped => self.raw_read_bit_mapped(snapshot, store, &block, addr, dst),
        }
    }

    /// Implements the bit-mapped read described in §4.2: each destination byte expands one source
    /// bit, LSB-first within its source byte.
    fn raw_read_bit_mapped(
        &self,
        snapshot: &Snapshot,
        store: &mut dyn BlockStore,
        block: &Block,
        addr: Address,
        dst: &mut [u8],
    ) -> Result<usize, MemoryMapError> {
        let Some(overlay_min) = block.mapping_target() else {
            return Ok(0);
        };

        let bit_offset = addr.offset() - block.start().offset();
        // Clamp to the bits this block itself still covers before ever touching the target.
        let limit = clamp_to_remaining(dst.len(), block.length(), bit_offset);
        if limit == 0 {
            return Ok(0);
        }
        let dst = &mut dst[..limit];

        let first_bit = bit_offset % 8;
        let base_byte = overlay_min.offset() + bit_offset / 8;
        let target = Address::new(overlay_min.space(), base_byte);

        let src_len = (first_bit + dst.len() as u64).div_ceil(8) + 1;
        let src_len = conversion::u64_to_usize_checked(src_len).unwrap_or(dst.len() + 2);
        let mut src_buf = vec![0u8; src_len];
        let got = self.raw_read_at(snapshot, store, target, &mut src_buf)?;

        let mut filled = 0;
        for (i, slot) in dst.iter_mut().enumerate() {
            let absolute_bit = first_bit + i as u64;
            let byte_idx = (absolute_bit / 8) as usize;
            let bit_idx = absolute_bit % 8;
            if byte_idx >= got {
                break;
            }
            *slot = (src_buf[byte_idx] >> bit_idx) & 1;
            filled += 1;
        }
        Ok(filled)
    }

    /// Writes `src` starting at `addr`, dispatching to the block (or chain of mapped blocks) that
    /// covers it.
    fn raw_write_at(
        &self,
        snapshot: &Snapshot,
        store: &mut dyn BlockStore,
        addr: Address,
        src: &[u8],
    ) -> Result<usize, MemoryMapError> {
        if src.is_empty() {
            return Ok(0);
        }

        let Some((_, block)) = snapshot.lookup(addr) else {
            return Ok(0);
        };

        match block.kind() {
            BlockKind::Default | BlockKind::Overlay => {
                if !block.is_initialized() {
                    return Ok(0);
                }
                let offset = addr.offset() - block.start().offset();
                store.write(block.id(), offset, src)?;
                Ok(src.len())
            }
            BlockKind::ByteMapped => {
                let Some(overlay_min) = block.mapping_target() else {
                    return Ok(0);
                };
                let off = addr.offset() - block.start().offset();
                let limit = clamp_to_remaining(src.len(), block.length(), off);
                let target = Address::new(overlay_min.space(), overlay_min.offset() + off);
                self.raw_write_at(snapshot, store, target, &src[..limit])
            }
            BlockKind::BitMapped => self.raw_write_bit_mapped(snapshot, store, &block, addr, src),
        }
    }

    /// Implements the bit-mapped write described in §4.2: every source byte must be `0x00` or
    /// `0x01`, then the corresponding target byte is read-modify-written.
    fn raw_write_bit_mapped(
        &self,
        snapshot: &Snapshot,
        store: &mut dyn BlockStore,
        block: &Block,
        addr: Address,
        src: &[u8],
    ) -> Result<usize, MemoryMapError> {
        let Some(overlay_min) = block.mapping_target() else {
            return Ok(0);
        };

        let bit_offset = addr.offset() - block.start().offset();
        let limit = clamp_to_remaining(src.len(), block.length(), bit_offset);
        let src = &src[..limit];

        if !src.iter().all(|&b| b == 0 || b == 1) {
            return Err(MemoryMapError::InvalidKind {
                operation: "bit-mapped write with a source byte other than 0x00/0x01",
                kind: block.kind(),
            });
        }

        for (i, &bit) in src.iter().enumerate() {
            let absolute_bit = bit_offset + i as u64;
            let byte_idx = absolute_bit / 8;
            let bit_idx = (absolute_bit % 8) as u8;
            let target = Address::new(overlay_min.space(), overlay_min.offset() + byte_idx);

            let mut current = [0u8];
            if self.raw_read_at(snapshot, store, target, &mut current)? == 0 {
                return Ok(i);
            }
            let updated = if bit == 1 {
                current[0] | (1 << bit_idx)
            } else {
                current[0] & !(1 << bit_idx)
            };
            if self.raw_write_at(snapshot, store, target, &[updated])? == 0 {
                return Ok(i);
            }
        }
        Ok(src.len())
    }

    /// Reads up to `dst.len()` bytes starting at `addr`, stopping at the first gap or unmapped
    /// block boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::MemoryAccess`] if not even one byte could be read.
    pub fn get_bytes(&self, addr: Address, dst: &mut [u8]) -> Result<usize, MemoryMapError> {
        if dst.is_empty() {
            return Ok(0);
        }

        if let Some(live) = self.live.lock().expect("live memory mutex poisoned").as_mut() {
            return Ok(live.get_bytes(addr, dst));
        }

        let guard = self.inner.lock();
        let snapshot = self.snapshot();
        let mut store = guard.store.borrow_mut();

        let mut num_read = 0usize;
        let mut cur = addr;
        while num_read < dst.len() {
            let n = self.raw_read_at(&snapshot, store.as_mut(), cur, &mut dst[num_read..])?;
            if n == 0 {
                break;
            }
            num_read += n;
            match cur.checked_add(n as u64) {
                Some(next) => cur = next,
                None => break,
            }
        }

        if num_read == 0 {
            return Err(MemoryMapError::MemoryAccess(addr));
        }
        Ok(num_read)
    }

    /// Reads the single byte at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::AccessDenied`] if no block covers `addr` or it is uninitialized.
    pub fn get_byte(&self, addr: Address) -> Result<u8, MemoryMapError> {
        let mut buf = [0u8; 1];
        match self.get_bytes(addr, &mut buf) {
            Ok(1) => Ok(buf[0]),
            _ => Err(MemoryMapError::AccessDenied(addr)),
        }
    }

    /// Writes the single byte `value` at `addr`.
    ///
    /// # Errors
    ///
    /// See [`Self::set_bytes`].
    pub fn set_byte(&self, addr: Address, value: u8) -> Result<(), MemoryMapError> {
        self.set_bytes(addr, &[value])
    }

    /// Pre-flights then performs a write of `src` starting at `addr`.
    ///
    /// If a live-memory handler is installed, delegates directly and emits `bytes-changed`.
    /// Otherwise the entire target range is validated — covered, initialized-or-mapped, and free
    /// of instruction conflicts — before any byte is mutated (§9's two-pass requirement).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::AccessDenied`] if any address in the span is uncovered,
    /// uninitialized, or overlaps a decoded instruction.
    pub fn set_bytes(&self, addr: Address, src: &[u8]) -> Result<(), MemoryMapError> {
        if src.is_empty() {
            return Ok(());
        }

        {
            let mut live_guard = self.live.lock().expect("live memory mutex poisoned");
            if let Some(live) = live_guard.as_mut() {
                let written = live.put_bytes(addr, src);
                drop(live_guard);

                if written > 0 {
                    let end = Address::new(addr.space(), addr.offset() + written as u64 - 1);
                    let guard = self.inner.lock();
                    guard.change_bus.borrow_mut().post(ChangeEvent::BytesChanged {
                        range: AddressRange::from_inclusive(addr, end),
                    });
                }
                return Ok(());
            }
        }

        let guard = self.inner.lock();
        let snapshot = self.snapshot();

        let mut cur = addr;
        let mut remaining = src.len() as u64;
        while remaining > 0 {
            let Some((_, block)) = snapshot.lookup(cur) else {
                return Err(MemoryMapError::AccessDenied(cur));
            };
            if !block.is_initialized_or_mapped() {
                return Err(MemoryMapError::AccessDenied(cur));
            }
            if guard.code_manager.borrow().instruction_containing(cur).is_some() {
                return Err(MemoryMapError::AccessDenied(cur));
            }

            let avail = (block.end().offset() - cur.offset() + 1).min(remaining);
            if let Some(instr) = guard.code_manager.borrow().instruction_after(cur) {
                if instr.range().start().offset() < cur.offset() + avail {
                    return Err(MemoryMapError::AccessDenied(instr.range().start()));
                }
            }

            remaining -= avail;
            cur = Address::new(cur.space(), cur.offset() + avail);
        }

        let mut written = 0usize;
        let mut cur = addr;
        {
            let mut store = guard.store.borrow_mut();
            while written < src.len() {
                let n = self.raw_write_at(&snapshot, store.as_mut(), cur, &src[written..])?;
                if n == 0 {
                    break;
                }
                written += n;
                cur = Address::new(cur.space(), cur.offset() + n as u64);
            }
        }

        let end = Address::new(addr.space(), addr.offset() + src.len() as u64 - 1);
        let range = AddressRange::from_inclusive(addr, end);
        guard.code_manager.borrow_mut().memory_changed(range);
        guard.change_bus.borrow_mut().post(ChangeEvent::BytesChanged { range });

        Ok(())
    }

    /// Reads a `u16` at `addr`, failing unless the full width is available.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::MemoryAccess`] on a short read.
    pub fn get_u16(&self, addr: Address, big_endian: Option<bool>) -> Result<u16, MemoryMapError> {
        let mut buf = [0u8; 2];
        if self.get_bytes(addr, &mut buf)? != 2 {
            return Err(MemoryMapError::MemoryAccess(addr));
        }
        Ok(self.resolve_endian(big_endian).unpack_u16(&buf))
    }

    /// Reads a `u32` at `addr`, failing unless the full width is available.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::MemoryAccess`] on a short read.
    pub fn get_u32(&self, addr: Address, big_endian: Option<bool>) -> Result<u32, MemoryMapError> {
        let mut buf = [0u8; 4];
        if self.get_bytes(addr, &mut buf)? != 4 {
            return Err(MemoryMapError::MemoryAccess(addr));
        }
        Ok(self.resolve_endian(big_endian).unpack_u32(&buf))
    }

    /// Reads a `u64` at `addr`, failing unless the full width is available.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::MemoryAccess`] on a short read.
    pub fn get_u64(&self, addr: Address, big_endian: Option<bool>) -> Result<u64, MemoryMapError> {
        let mut buf = [0u8; 8];
        if self.get_bytes(addr, &mut buf)? != 8 {
            return Err(MemoryMapError::MemoryAccess(addr));
        }
        Ok(self.resolve_endian(big_endian).unpack_u64(&buf))
    }

    /// Reads up to `n` `u16`s starting at `addr`, allowing a short read; returns the number of
    /// complete elements decoded.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::MemoryAccess`] if not even one byte could be read.
    pub fn get_u16s(&self, addr: Address, dst: &mut [u16], big_endian: Option<bool>) -> Result<usize, MemoryMapError> {
        let mut buf = vec![0u8; dst.len() * 2];
        let n = self.get_bytes(addr, &mut buf)?;
        Ok(self.resolve_endian(big_endian).unpack_u16s(&buf[..n], dst))
    }

    /// Reads up to `n` `u32`s starting at `addr`, allowing a short read.
    ///
    /// # Errors
    ///
    /// See [`Self::get_u16s`].
    pub fn get_u32s(&self, addr: Address, dst: &mut [u32], big_endian: Option<bool>) -> Result<usize, MemoryMapError> {
        let mut buf = vec![0u8; dst.len() * 4];
        let n = self.get_bytes(addr, &mut buf)?;
        Ok(self.resolve_endian(big_endian).unpack_u32s(&buf[..n], dst))
    }

    /// Reads up to `n` `u64`s starting at `addr`, allowing a short read.
    ///
    /// # Errors
    ///
    /// See [`Self::get_u16s`].
    pub fn get_u64s(&self, addr: Address, dst: &mut [u64], big_endian: Option<bool>) -> Result<usize, MemoryMapError> {
        let mut buf = vec![0u8; dst.len() * 8];
        let n = self.get_bytes(addr, &mut buf)?;
        Ok(self.resolve_endian(big_endian).unpack_u64s(&buf[..n], dst))
    }

    /// Encodes and writes `value` as a `u16` at `addr`.
    ///
    /// # Errors
    ///
    /// See [`Self::set_bytes`].
    pub fn set_u16(&self, addr: Address, value: u16, big_endian: Option<bool>) -> Result<(), MemoryMapError> {
        self.set_bytes(addr, &self.resolve_endian(big_endian).pack_u16(value))
    }

    /// Encodes and writes `value` as a `u32` at `addr`.
    ///
    /// # Errors
    ///
    /// See [`Self::set_bytes`].
    pub fn set_u32(&self, addr: Address, value: u32, big_endian: Option<bool>) -> Result<(), MemoryMapError> {
        self.set_bytes(addr, &self.resolve_endian(big_endian).pack_u32(value))
    }

    /// Encodes and writes `value` as a `u64` at `addr`.
    ///
    /// # Errors
    ///
    /// See [`Self::set_bytes`].
    pub fn set_u64(&self, addr: Address, value: u64, big_endian: Option<bool>) -> Result<(), MemoryMapError> {
        self.set_bytes(addr, &self.resolve_endian(big_endian).pack_u64(value))
    }

    /// Searches for `pattern` (optionally masked) starting at `start`.
    ///
    /// Iterates `loaded_initialized_set`, or `all_initialized_set` when `end` is given (§4.8).
    /// Backward searches (`forward = false`) only ever consider exact matches and, per this
    /// implementation's resolution of the source's ambiguous bound, treat `end` as exclusive: the
    /// search never returns an address at or below `end`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::Cancelled`] if `monitor` cancels mid-search.
    #[allow(clippy::too_many_arguments)]
    pub fn find_bytes(
        &self,
        start: Address,
        end: Option<Address>,
        pattern: &[u8],
        mask: Option<&[u8]>,
        forward: bool,
        monitor: Option<&dyn Monitor>,
    ) -> Result<Option<Address>, MemoryMapError> {
        if pattern.is_empty() {
            return Ok(None);
        }

        let snapshot = self.snapshot();
        let live = self.is_live();
        let set = if live {
            &snapshot.addr_set
        } else if end.is_some() {
            &snapshot.all_initialized_set
        } else {
            &snapshot.loaded_initialized_set
        };
        let mut cursor = crate::search::Cursor::new(set, start.space(), start, end, forward);

        let mut buf = vec![0u8; pattern.len()];
        let guard = self.inner.lock();
        let mut store = guard.store.borrow_mut();
        while let Some(addr) = cursor.current() {
            if let Some(m) = monitor {
                if m.is_cancelled() {
                    return Err(MemoryMapError::Cancelled);
                }
            }

            let n = if live {
                let mut live_guard = self.live.lock().expect("live memory mutex poisoned");
                match live_guard.as_mut() {
                    Some(handler) => handler.get_bytes(addr, &mut buf),
                    None => 0,
                }
            } else {
                self.raw_read_at(&snapshot, store.as_mut(), addr, &mut buf)?
            };

            if n == pattern.len() {
                let matched = match mask {
                    None => buf == pattern,
                    Some(mask) => buf.iter().zip(pattern).zip(mask).all(|((b, p), m)| (b & m) == (p & m)),
                };
                if matched {
                    return Ok(Some(addr));
                }
            }

            if forward {
                let skip = if n == pattern.len() {
                    crate::search::safe_skip(pattern, mask, &buf)
                } else {
                    1
                };
                cursor.advance_by(skip);
            } else {
                cursor.advance_by(1);
            }
        }

        Ok(None)
    }
}
