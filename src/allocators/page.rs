//! A single heap subdivided into blocks.
//!
//! A page keeps its free blocks sorted by offset. Neighbouring free blocks are
//! merged as soon as they touch, so two entries in the list are never adjacent.

use crate::allocators::block::{split_block, Block};
use crate::api::error::AllocError;
use crate::api::stats::PageInfo;
use crate::gpu::traits::{GpuAllocError, HeapId};

/// One externally created heap plus its free-list bookkeeping.
pub struct Page<H> {
    /// The heap backing this page
    heap: H,
    /// Identity of `heap`, used to find this page again on deallocation
    heap_id: HeapId,
    /// Free blocks, sorted by offset, never overlapping or touching
    free_blocks: Vec<Block>,
    /// Size of the heap in bytes
    page_size: u32,
    /// Live allocations carved from this page
    num_allocations: u32,
    /// Size of the largest entry in `free_blocks`, 0 if there is none
    largest_free_block: u32,
}

impl<H> Page<H> {
    /// Wrap a freshly created heap of `page_size` bytes. The whole heap starts free.
    pub fn new(heap: H, heap_id: HeapId, page_size: u32) -> Self {
        debug_assert!(page_size != 0);
        Self {
            heap,
            heap_id,
            free_blocks: vec![Block::new(0, page_size)],
            page_size,
            num_allocations: 0,
            largest_free_block: page_size,
        }
    }

    /// Allocate `size` bytes (rounded up to `alignment`) from the first free
    /// block large enough to hold them.
    ///
    /// `create` places the concrete resource in the heap at the chosen block.
    /// If it fails the free list is left untouched.
    pub fn allocate<R, F>(&mut self, size: u32, alignment: u32, create: F) -> Result<(Block, R), AllocError>
    where
        F: FnOnce(&H, Block) -> Result<R, GpuAllocError>,
    {
        debug_assert!(size != 0);
        if size > self.largest_free_block {
            return Err(AllocError::NoSuitableBlock);
        }

        // TODO: first-fit linear scan; switch to best-fit once fragmentation shows up in page stats
        let index = self
            .free_blocks
            .iter()
            .position(|block| block.size >= size)
            .ok_or(AllocError::NoSuitableBlock)?;

        let (alloc, remainder) = split_block(self.free_blocks[index], size, alignment);

        let resource = create(&self.heap, alloc)?;

        match remainder {
            Some(rest) => self.free_blocks[index] = rest,
            None => {
                self.free_blocks.remove(index);
            }
        }

        self.largest_free_block = self.free_blocks.iter().map(|b| b.size).max().unwrap_or(0);
        debug_assert!(self.free_blocks.is_empty() || self.largest_free_block != 0);

        self.num_allocations += 1;
        Ok((alloc, resource))
    }

    /// Return a block previously handed out by [`Page::allocate`].
    pub fn deallocate(&mut self, block: Block, alignment: u32) {
        debug_assert!(block.size != 0);
        debug_assert!(block.end() <= self.page_size);
        debug_assert!(block.is_aligned(alignment));
        debug_assert!(
            !self.free_blocks.iter().any(|free| free.overlaps(&block)),
            "released block overlaps a free block (double free?)"
        );
        debug_assert!(self.num_allocations != 0);

        // First free block starting after the released one
        let next = self.free_blocks.partition_point(|free| free.offset < block.offset);

        let merged = if next > 0 && self.free_blocks[next - 1].end() == block.offset {
            self.free_blocks[next - 1].size += block.size;
            next - 1
        } else {
            self.free_blocks.insert(next, block);
            next
        };

        if merged + 1 < self.free_blocks.len()
            && self.free_blocks[merged].end() == self.free_blocks[merged + 1].offset
        {
            let following = self.free_blocks.remove(merged + 1);
            self.free_blocks[merged].size += following.size;
        }

        self.largest_free_block = self.largest_free_block.max(self.free_blocks[merged].size);
        self.num_allocations -= 1;

        debug_assert!(self.check_invariants(alignment).is_ok());
    }

    /// Whether the free list is a single block spanning the whole page.
    pub fn is_empty(&self) -> bool {
        self.free_blocks.len() == 1 && self.free_blocks[0] == Block::new(0, self.page_size)
    }

    /// Verify the free-list invariants, returning the first one violated.
    pub fn check_invariants(&self, alignment: u32) -> Result<(), &'static str> {
        let mut largest = 0;
        for (i, block) in self.free_blocks.iter().enumerate() {
            if block.size == 0 {
                return Err("empty free block");
            }
            if !block.is_aligned(alignment) {
                return Err("unaligned free block");
            }
            if block.end() > self.page_size {
                return Err("free block outside page");
            }
            if let Some(next) = self.free_blocks.get(i + 1) {
                if block.end() > next.offset {
                    return Err("free blocks unsorted or overlapping");
                }
                if block.end() == next.offset {
                    return Err("adjacent free blocks not coalesced");
                }
            }
            largest = largest.max(block.size);
        }
        if largest != self.largest_free_block {
            return Err("largest free block cache is stale");
        }
        Ok(())
    }

    /// Snapshot of this page for diagnostics.
    pub fn info(&self) -> PageInfo {
        PageInfo {
            page_size_bytes: self.page_size,
            num_allocations: self.num_allocations,
            num_free_blocks: self.free_blocks.len() as u32,
            largest_free_block_bytes: self.largest_free_block,
        }
    }

    /// Total free bytes in this page.
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks.iter().map(|b| b.size as u64).sum()
    }

    /// The free blocks, sorted by offset.
    pub fn free_blocks(&self) -> &[Block] {
        &self.free_blocks
    }

    /// Identity of the backing heap.
    pub fn heap_id(&self) -> HeapId {
        self.heap_id
    }

    /// Size of the page in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of live allocations.
    pub fn num_allocations(&self) -> u32 {
        self.num_allocations
    }

    /// Size of the largest free block, 0 if the page is full.
    pub fn largest_free_block(&self) -> u32 {
        self.largest_free_block
    }

    /// Give up the page, returning its heap for release.
    pub fn into_heap(self) -> H {
        self.heap
    }
}
