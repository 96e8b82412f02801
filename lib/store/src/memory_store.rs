//! A reference [`BlockStore`] backed by an in-process `BTreeMap`, with no external persistence.

use std::collections::BTreeMap;

use crate::{BlockId, BlockKind, BlockRecord, BlockStore, NewBlock, StoreError};

/// A single persisted block: its record plus, for Default/Overlay blocks created initialized, the
/// owned backing bytes.
struct StoredBlock {
    /// The block's persisted metadata.
    record: BlockRecord,
    /// The block's owned backing bytes, if any.
    bytes: Option<Vec<u8>>,
}

/// An in-memory [`BlockStore`], suitable for tests and for programs with no cross-process
/// persistence requirement.
///
/// Every method is called with the memory map's program lock already held, so the single
/// `BTreeMap` here needs no internal locking of its own (see [`BlockStore`]'s contract).
#[derive(Default)]
pub struct InMemoryBlockStore {
    /// The next identity to assign to a newly created block.
    next_id: u32,
    /// Every currently persisted block, keyed by identity.
    records: BTreeMap<BlockId, StoredBlock>,
}

impl InMemoryBlockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn load_all(&mut self) -> Result<Vec<BlockRecord>, StoreError> {
        let mut records: Vec<_> = self.records.values().map(|stored| stored.record.clone()).collect();
        records.sort_by_key(|record| record.start);
        Ok(records)
    }

    fn refresh(&mut self) -> Result<(), StoreError> {
        // Nothing is cached beyond `records` itself, which is always authoritative.
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(name = %request.name, kind = ?request.kind))]
    fn create_block(&mut self, request: NewBlock<'_>) -> Result<BlockRecord, StoreError> {
        let id = BlockId::from_raw(self.next_id);
        self.next_id = self.next_id.checked_add(1).expect("block store identity space exhausted");

        let bytes = if request.kind.can_own_bytes() && request.initialized {
            let len = conversion::u64_to_usize_checked(request.length)
                .ok_or(StoreError::LengthOverflow(request.length))?;
            let mut buf = vec![0u8; len];
            if let Some(stream) = request.fill {
                let filled = stream.read(&mut buf)?;
                buf[filled..].fill(0);
            }
            Some(buf)
        } else {
            None
        };

        let record = BlockRecord {
            id,
            kind: request.kind,
            name: request.name,
            start: request.start,
            length: request.length,
            permissions: request.permissions,
            initialized: request.initialized,
            mapping_target: request.mapping_target,
        };

        self.records.insert(id, StoredBlock {
            record: record.clone(),
            bytes,
        });
        tracing::debug!(?id, "block created");
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    fn delete(&mut self, id: BlockId) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .ok_or(StoreError::NotFound(id))
            .inspect(|_| tracing::debug!(?id, "block deleted"))
            .map(drop)
    }

    fn update(&mut self, record: BlockRecord) -> Result<(), StoreError> {
        let stored = self.records.get_mut(&record.id).ok_or(StoreError::NotFound(record.id))?;

        if record.kind.can_own_bytes() {
            match (&mut stored.bytes, record.initialized) {
                (Some(bytes), true) => {
                    let len = conversion::u64_to_usize_checked(record.length)
                        .ok_or(StoreError::LengthOverflow(record.length))?;
                    bytes.resize(len, 0);
                }
                (bytes @ None, true) => {
                    let len = conversion::u64_to_usize_checked(record.length)
                        .ok_or(StoreError::LengthOverflow(record.length))?;
                    *bytes = Some(vec![0u8; len]);
                }
                (bytes, false) => *bytes = None,
            }
        }

        stored.record = record;
        Ok(())
    }

    fn read(&mut self, id: BlockId, offset: u64, dst: &mut [u8]) -> Result<usize, StoreError> {
        let stored = self.records.get(&id).ok_or(StoreError::NotFound(id))?;
        let bytes = stored.bytes.as_deref().ok_or(StoreError::NoBackingBytes(id))?;

        let offset = conversion::u64_to_usize_checked(offset).ok_or(StoreError::OutOfRange {
            id,
            offset,
            len: dst.len(),
        })?;
        if offset > bytes.len() {
            return Err(StoreError::OutOfRange {
                id,
                offset: offset as u64,
                len: dst.len(),
            });
        }

        let available = &bytes[offset..];
        let n = dst.len().min(available.len());
        dst[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&mut self, id: BlockId, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        let stored = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let bytes = stored.bytes.as_deref_mut().ok_or(StoreError::NoBackingBytes(id))?;

        let offset = conversion::u64_to_usize_checked(offset).ok_or(StoreError::OutOfRange {
            id,
            offset,
            len: src.len(),
        })?;
        let end = offset.checked_add(src.len()).filter(|&end| end <= bytes.len()).ok_or(
            StoreError::OutOfRange {
                id,
                offset: offset as u64,
                len: src.len(),
            },
        )?;

        bytes[offset..end].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Permissions, stream::ConstantByteStream};
    use addr::{Address, AddressSpaceId};

    fn addr(offset: u64) -> Address {
        Address::new(AddressSpaceId::from_raw(0), offset)
    }

    #[test]
    fn create_initialized_block_fills_from_stream() {
        let mut store = InMemoryBlockStore::new();
        let mut stream = ConstantByteStream::new(0xAA);
        let record = store
            .create_block(NewBlock {
                kind: BlockKind::Default,
                name: ".text".to_string(),
                start: addr(0x1000),
                length: 16,
                mapping_target: None,
                initialized: true,
                permissions: Permissions::READ,
                fill: Some(&mut stream),
            })
            .unwrap();

        let mut buf = [0u8; 4];
        let n = store.read(record.id, 4, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn uninitialized_block_has_no_backing_bytes() {
        let mut store = InMemoryBlockStore::new();
        let record = store
            .create_block(NewBlock {
                kind: BlockKind::Default,
                name: ".bss".to_string(),
                start: addr(0x2000),
                length: 0x100,
                mapping_target: None,
                initialized: false,
                permissions: Permissions::READ | Permissions::WRITE,
                fill: None,
            })
            .unwrap();

        let mut buf = [0u8; 1];
        assert!(matches!(store.read(record.id, 0, &mut buf), Err(StoreError::NoBackingBytes(_))));
    }

    #[test]
    fn write_out_of_range_is_rejected() {
        let mut store = InMemoryBlockStore::new();
        let record = store
            .create_block(NewBlock {
                kind: BlockKind::Default,
                name: ".data".to_string(),
                start: addr(0),
                length: 4,
                mapping_target: None,
                initialized: true,
                permissions: Permissions::READ | Permissions::WRITE,
                fill: None,
            })
            .unwrap();

        assert!(matches!(
            store.write(record.id, 2, &[1, 2, 3]),
            Err(StoreError::OutOfRange { .. })
        ));
    }

    #[test]
    fn delete_then_load_all_omits_block() {
        let mut store = InMemoryBlockStore::new();
        let record = store
            .create_block(NewBlock {
                kind: BlockKind::Default,
                name: "x".to_string(),
                start: addr(0),
                length: 1,
                mapping_target: None,
                initialized: false,
                permissions: Permissions::empty(),
                fill: None,
            })
            .unwrap();

        store.delete(record.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn load_all_is_sorted_by_start() {
        let mut store = InMemoryBlockStore::new();
        for start in [0x2000, 0x1000, 0x3000] {
            store
                .create_block(NewBlock {
                    kind: BlockKind::Default,
                    name: format!("b{start:x}"),
                    start: addr(start),
                    length: 0x10,
                    mapping_target: None,
                    initialized: false,
                    permissions: Permissions::empty(),
                    fill: None,
                })
                .unwrap();
        }

        let starts: Vec<_> = store.load_all().unwrap().into_iter().map(|r| r.start.offset()).collect();
        assert_eq!(starts, vec![0x1000, 0x2000, 0x3000]);
    }
}
