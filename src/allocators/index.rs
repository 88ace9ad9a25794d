//! Reverse lookup from resource identity to its owning page and block.

use std::collections::HashMap;

use crate::allocators::block::Block;
use crate::gpu::traits::{HeapId, MemoryClass, ResourceId};

/// Where a live resource was carved from.
#[derive(Debug, Clone)]
pub struct AllocEntry {
    /// The block carved for the resource
    pub block: Block,
    /// Pool the owning page lives in
    pub class: MemoryClass,
    /// Identity of the owning page's heap
    pub heap_id: HeapId,
    /// Where the allocation was requested from
    #[cfg(feature = "debug")]
    pub backtrace: backtrace::Backtrace,
}

impl AllocEntry {
    /// Create an entry, capturing the allocation site when `debug` is enabled.
    pub fn new(block: Block, class: MemoryClass, heap_id: HeapId) -> Self {
        Self {
            block,
            class,
            heap_id,
            #[cfg(feature = "debug")]
            backtrace: backtrace::Backtrace::new_unresolved(),
        }
    }
}

/// A live allocation, as reported by leak checks.
#[derive(Debug, Clone)]
pub struct LiveAllocation {
    /// Identity of the resource
    pub resource: ResourceId,
    /// Memory class it was allocated from
    pub class: MemoryClass,
    /// Block occupied in the owning page
    pub block: Block,
    /// Owning heap
    pub heap_id: HeapId,
    /// Resolved allocation backtrace
    #[cfg(feature = "debug")]
    pub backtrace: String,
}

/// Map from resource identity to allocation entry.
#[derive(Default)]
pub struct AllocationIndex {
    entries: HashMap<ResourceId, AllocEntry>,
}

impl AllocationIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new allocation.
    ///
    /// Devices hand out unique resource ids, so the key must not be present yet.
    pub fn insert(&mut self, resource: ResourceId, entry: AllocEntry) {
        let previous = self.entries.insert(resource, entry);
        debug_assert!(previous.is_none(), "device reused a live resource id");
    }

    /// Remove and return the entry for `resource`.
    pub fn remove(&mut self, resource: ResourceId) -> Option<AllocEntry> {
        self.entries.remove(&resource)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the live entries.
    pub fn entries(&self) -> impl Iterator<Item = &AllocEntry> {
        self.entries.values()
    }

    /// Describe every live entry.
    pub fn live(&self) -> impl Iterator<Item = LiveAllocation> + '_ {
        self.entries.iter().map(|(&resource, entry)| LiveAllocation {
            resource,
            class: entry.class,
            block: entry.block,
            heap_id: entry.heap_id,
            #[cfg(feature = "debug")]
            backtrace: {
                let mut bt = entry.backtrace.clone();
                bt.resolve();
                format!("{:?}", bt)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut index = AllocationIndex::new();
        let entry = AllocEntry::new(Block::new(0, 65536), MemoryClass::Upload, HeapId(7));
        index.insert(ResourceId(1), entry);

        assert_eq!(index.len(), 1);

        let removed = index.remove(ResourceId(1)).unwrap();
        assert_eq!(removed.class, MemoryClass::Upload);
        assert_eq!(removed.heap_id, HeapId(7));
        assert!(index.remove(ResourceId(1)).is_none());
        assert!(index.is_empty());
        assert_eq!(index.entries().count(), 0);
    }

    #[test]
    fn test_live_report() {
        let mut index = AllocationIndex::new();
        index.insert(ResourceId(3), AllocEntry::new(Block::new(65536, 65536), MemoryClass::Device, HeapId(1)));

        let live: Vec<_> = index.live().collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].resource, ResourceId(3));
        assert_eq!(live[0].block, Block::new(65536, 65536));
    }
}
