//! Allocation statistics.

use crate::gpu::traits::MemoryClass;
use crate::util::size::format_bytes;

/// Bookkeeping of a single page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Size of the page's heap.
    pub page_size_bytes: u32,

    /// Live allocations in the page.
    pub num_allocations: u32,

    /// Entries in the page's free list.
    pub num_free_blocks: u32,

    /// Largest contiguous free range.
    pub largest_free_block_bytes: u32,
}

/// Statistics for one memory class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassStats {
    /// Memory class described.
    pub class: MemoryClass,

    /// Total number of allocations performed.
    pub allocation_count: u64,

    /// Total number of deallocations performed.
    pub deallocation_count: u64,

    /// Pages currently in the pool.
    pub num_pages: usize,

    /// Bytes reserved from the device by those pages.
    pub reserved_bytes: u64,

    /// Bytes of those pages not handed out.
    pub free_bytes: u64,
}

impl ClassStats {
    /// Create empty stats for `class`.
    pub fn new(class: MemoryClass) -> Self {
        Self {
            class,
            allocation_count: 0,
            deallocation_count: 0,
            num_pages: 0,
            reserved_bytes: 0,
            free_bytes: 0,
        }
    }

    /// Calculate active allocations.
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }

    /// Bytes handed out to live allocations.
    pub fn used_bytes(&self) -> u64 {
        self.reserved_bytes - self.free_bytes
    }

    /// Fraction of reserved memory in use (0.0 when nothing is reserved).
    pub fn utilization(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.reserved_bytes as f64
    }
}

/// Aggregated allocator statistics, one entry per memory class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Per-class statistics, indexed by [`MemoryClass::index`].
    pub classes: [ClassStats; 3],
}

impl AllocatorStats {
    /// Statistics for `class`.
    pub fn class(&self, class: MemoryClass) -> &ClassStats {
        &self.classes[class.index()]
    }

    /// Bytes reserved across all classes.
    pub fn total_reserved(&self) -> u64 {
        self.classes.iter().map(|c| c.reserved_bytes).sum()
    }

    /// Live allocations across all classes.
    pub fn active_allocations(&self) -> u64 {
        self.classes.iter().map(|c| c.active_allocations()).sum()
    }
}

impl std::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GPU Allocation Statistics:")?;
        for stats in &self.classes {
            writeln!(f, "  [{}]", stats.class)?;
            writeln!(f, "    Allocations:   {}", stats.allocation_count)?;
            writeln!(f, "    Deallocations: {}", stats.deallocation_count)?;
            writeln!(f, "    Active:        {}", stats.active_allocations())?;
            writeln!(f, "    Pages:         {}", stats.num_pages)?;
            writeln!(f, "    Reserved:      {}", format_bytes(stats.reserved_bytes))?;
            writeln!(f, "    Used:          {}", format_bytes(stats.used_bytes()))?;
        }
        writeln!(f, "  Total reserved:  {}", format_bytes(self.total_reserved()))?;
        Ok(())
    }
}
