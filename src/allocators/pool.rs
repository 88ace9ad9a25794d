//! Ordered collection of pages for one memory class.

use crate::allocators::page::Page;
use crate::gpu::traits::{HeapId, MemoryClass};

/// The pages of one memory class, in creation order.
///
/// Pages are appended when the pool grows and removed when reclaimed;
/// the remaining pages never change their relative order.
pub struct PagePool<H> {
    class: MemoryClass,
    pages: Vec<Page<H>>,
}

impl<H> PagePool<H> {
    /// Create an empty pool.
    pub fn new(class: MemoryClass) -> Self {
        Self {
            class,
            pages: Vec::new(),
        }
    }

    /// Memory class served by this pool.
    pub fn class(&self) -> MemoryClass {
        self.class
    }

    /// Index of the first page with a free block of at least `size` bytes.
    pub fn find_page(&self, size: u32) -> Option<usize> {
        self.pages.iter().position(|page| page.largest_free_block() >= size)
    }

    /// Resolve the page owning `heap_id` by scanning the pool.
    ///
    /// Positions shift whenever a page is reclaimed, so entries never cache them.
    pub fn position_of(&self, heap_id: HeapId) -> Option<usize> {
        self.pages.iter().position(|page| page.heap_id() == heap_id)
    }

    /// Append a page, returning its index.
    pub fn push(&mut self, page: Page<H>) -> usize {
        self.pages.push(page);
        self.pages.len() - 1
    }

    /// Remove the page at `index`, keeping the order of the others.
    pub fn remove(&mut self, index: usize) -> Page<H> {
        self.pages.remove(index)
    }

    /// Remove every empty page after the first `keep` empty ones.
    pub fn drain_empty(&mut self, keep: usize) -> Vec<Page<H>> {
        let mut kept = 0;
        let mut drained = Vec::new();
        let mut i = 0;
        while i < self.pages.len() {
            if self.pages[i].is_empty() {
                if kept < keep {
                    kept += 1;
                } else {
                    drained.push(self.pages.remove(i));
                    continue;
                }
            }
            i += 1;
        }
        drained
    }

    /// Number of pages whose free list spans the whole page.
    pub fn num_empty(&self) -> usize {
        self.pages.iter().filter(|page| page.is_empty()).count()
    }

    /// Get the page at `index`.
    pub fn get(&self, index: usize) -> Option<&Page<H>> {
        self.pages.get(index)
    }

    /// Get the page at `index` mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Page<H>> {
        self.pages.get_mut(index)
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Iterate over the pages in order.
    pub fn iter(&self) -> impl Iterator<Item = &Page<H>> {
        self.pages.iter()
    }

    /// Take every page out of the pool.
    pub fn take_all(&mut self) -> Vec<Page<H>> {
        std::mem::take(&mut self.pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::traits::GpuAllocError;

    const U: u32 = 1024;

    fn pool_with(sizes: &[u32]) -> PagePool<()> {
        let mut pool = PagePool::new(MemoryClass::Device);
        for (i, &units) in sizes.iter().enumerate() {
            pool.push(Page::new((), HeapId(i as u64), units * U));
        }
        pool
    }

    #[test]
    fn test_find_first_page_with_room() {
        let mut pool = pool_with(&[2, 8, 8]);
        assert_eq!(pool.find_page(4 * U), Some(1));

        let page = pool.get_mut(1).unwrap();
        page.allocate(6 * U, U, |_, b| Ok::<_, GpuAllocError>(b)).unwrap();

        assert_eq!(pool.find_page(4 * U), Some(2));
        assert_eq!(pool.find_page(2 * U), Some(0));
        assert_eq!(pool.find_page(9 * U), None);
    }

    #[test]
    fn test_identity_survives_removal() {
        let mut pool = pool_with(&[1, 1, 1]);
        assert_eq!(pool.position_of(HeapId(2)), Some(2));

        pool.remove(0);
        assert_eq!(pool.position_of(HeapId(2)), Some(1));
        assert_eq!(pool.position_of(HeapId(0)), None);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_drain_empty_keeps_requested_count() {
        let mut pool = pool_with(&[1, 1, 1, 1]);
        pool.get_mut(1)
            .unwrap()
            .allocate(U, U, |_, b| Ok::<_, GpuAllocError>(b))
            .unwrap();

        let drained = pool.drain_empty(1);
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.num_empty(), 1);
        let ids: Vec<_> = pool.iter().map(|p| p.heap_id()).collect();
        assert_eq!(ids, vec![HeapId(0), HeapId(1)]);
    }
}
