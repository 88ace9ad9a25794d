//! Dummy GPU device for testing
//!
//! Heaps are bookkeeping only: no memory is reserved, but every placement is
//! checked against the heap bounds and against the resources already placed
//! in it, so overlapping sub-allocations surface as errors.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::traits::*;
use crate::sync::mutex::Mutex;
use crate::util::size::kb;

/// Ids are unique across every dummy device in the process.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Counters and failure switches shared between a device and its heaps.
#[derive(Debug, Default)]
struct Shared {
    heaps_created: AtomicUsize,
    live_heaps: AtomicUsize,
    live_resources: AtomicUsize,
    reserved_bytes: AtomicU64,
    released_in_use: AtomicUsize,
    fail_heaps: AtomicBool,
    fail_resources: AtomicBool,
}

/// Byte ranges placed in one heap.
#[derive(Debug, Default)]
struct Placements {
    ranges: Mutex<Vec<(u32, u32)>>,
}

impl Placements {
    fn place(&self, heap_size: u32, offset: u32, size: u32) -> Result<(), GpuAllocError> {
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= heap_size)
            .ok_or(GpuAllocError::InvalidSize)?;

        let mut ranges = self.ranges.lock();
        if ranges.iter().any(|&(start, len)| offset < start + len && start < end) {
            return Err(GpuAllocError::BackendError(format!(
                "placement {}..{} overlaps a live resource",
                offset, end
            )));
        }
        ranges.push((offset, size));
        Ok(())
    }

    fn remove(&self, offset: u32, size: u32) {
        let mut ranges = self.ranges.lock();
        if let Some(pos) = ranges.iter().position(|&r| r == (offset, size)) {
            ranges.swap_remove(pos);
        }
    }

    fn is_empty(&self) -> bool {
        self.ranges.lock().is_empty()
    }
}

/// A buffer placed in a [`DummyMemoryHeap`].
#[derive(Debug)]
pub struct DummyBuffer {
    id: ResourceId,
    heap: HeapId,
    offset: u32,
    size: u32,
    placements: Arc<Placements>,
}

impl DummyBuffer {
    /// Heap the buffer lives in.
    pub fn heap_id(&self) -> HeapId {
        self.heap
    }

    /// Offset of the buffer in its heap.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Bytes reserved for the buffer.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// A second handle with the same identity, as a double free would pass in.
    pub fn forge_copy(&self) -> Self {
        Self {
            id: self.id,
            heap: self.heap,
            offset: self.offset,
            size: self.size,
            placements: Arc::clone(&self.placements),
        }
    }
}

impl GpuResource for DummyBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
}

/// A texture placed in a [`DummyTextureHeap`].
#[derive(Debug)]
pub struct DummyTexture {
    id: ResourceId,
    heap: HeapId,
    offset: u32,
    size: u32,
    desc: TextureDesc,
    placements: Arc<Placements>,
}

impl DummyTexture {
    pub fn heap_id(&self) -> HeapId {
        self.heap
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// A second handle with the same identity, as a double free would pass in.
    pub fn forge_copy(&self) -> Self {
        Self {
            id: self.id,
            heap: self.heap,
            offset: self.offset,
            size: self.size,
            desc: self.desc,
            placements: Arc::clone(&self.placements),
        }
    }
}

impl GpuResource for DummyTexture {
    fn id(&self) -> ResourceId {
        self.id
    }
}

/// Heap for buffers of one memory class.
#[derive(Debug)]
pub struct DummyMemoryHeap {
    id: HeapId,
    size: u32,
    class: MemoryClass,
    placements: Arc<Placements>,
    shared: Arc<Shared>,
}

impl DummyMemoryHeap {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn class(&self) -> MemoryClass {
        self.class
    }
}

impl MemoryHeap for DummyMemoryHeap {
    type Buffer = DummyBuffer;

    fn id(&self) -> HeapId {
        self.id
    }

    fn create_buffer(&self, offset: u32, size: u32) -> Result<DummyBuffer, GpuAllocError> {
        if self.shared.fail_resources.load(Ordering::Relaxed) {
            return Err(GpuAllocError::BackendError("buffer creation disabled".to_string()));
        }
        self.placements.place(self.size, offset, size)?;
        self.shared.live_resources.fetch_add(1, Ordering::Relaxed);

        Ok(DummyBuffer {
            id: ResourceId(next_id()),
            heap: self.id,
            offset,
            size,
            placements: Arc::clone(&self.placements),
        })
    }
}

/// Heap for textures.
#[derive(Debug)]
pub struct DummyTextureHeap {
    id: HeapId,
    size: u32,
    texture_alignment: u32,
    placements: Arc<Placements>,
    shared: Arc<Shared>,
}

impl TextureHeap for DummyTextureHeap {
    type Texture = DummyTexture;

    fn id(&self) -> HeapId {
        self.id
    }

    fn create_texture(&self, desc: &TextureDesc, offset: u32, size: u32) -> Result<DummyTexture, GpuAllocError> {
        if self.shared.fail_resources.load(Ordering::Relaxed) {
            return Err(GpuAllocError::BackendError("texture creation disabled".to_string()));
        }
        if offset % self.texture_alignment != 0 {
            return Err(GpuAllocError::AlignmentFailed);
        }
        if texture_footprint(desc)? > u64::from(size) {
            return Err(GpuAllocError::InvalidSize);
        }
        self.placements.place(self.size, offset, size)?;
        self.shared.live_resources.fetch_add(1, Ordering::Relaxed);

        Ok(DummyTexture {
            id: ResourceId(next_id()),
            heap: self.id,
            offset,
            size,
            desc: *desc,
            placements: Arc::clone(&self.placements),
        })
    }
}

/// Bytes used by every mip level of `desc`.
fn texture_footprint(desc: &TextureDesc) -> Result<u64, GpuAllocError> {
    let bpp = u64::from(desc.format.bytes_per_pixel());
    let mut total: u64 = 0;
    for mip in 0..desc.num_mipmaps {
        let w = u64::from(desc.width.checked_shr(mip).unwrap_or(0).max(1));
        let h = u64::from(desc.height.checked_shr(mip).unwrap_or(0).max(1));
        total = total
            .checked_add(w * h * bpp)
            .ok_or(GpuAllocError::InvalidSize)?;
    }
    Ok(total)
}

/// Dummy device for testing.
///
/// Failures can be injected at runtime with [`fail_heap_creation`](Self::fail_heap_creation)
/// and [`fail_resource_creation`](Self::fail_resource_creation), or by capping the
/// bytes all heaps may reserve with [`with_heap_budget`](Self::with_heap_budget).
/// Clones share counters and failure switches, so a test can keep one to
/// inspect the device after handing the other to an allocator.
#[derive(Debug, Clone)]
pub struct DummyDevice {
    shared: Arc<Shared>,
    heap_budget: Option<u64>,
    texture_alignment: u32,
}

impl DummyDevice {
    /// Create a device without limits.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            heap_budget: None,
            texture_alignment: kb(64),
        }
    }

    /// Refuse heaps once `bytes` are reserved in total.
    pub fn with_heap_budget(mut self, bytes: u64) -> Self {
        self.heap_budget = Some(bytes);
        self
    }

    /// Report `alignment` as the placement alignment of every texture.
    pub fn with_texture_alignment(mut self, alignment: u32) -> Self {
        self.texture_alignment = alignment;
        self
    }

    /// Make heap creation fail with `OutOfMemory` while `fail` is set.
    pub fn fail_heap_creation(&self, fail: bool) {
        self.shared.fail_heaps.store(fail, Ordering::Relaxed);
    }

    /// Make buffer and texture creation fail while `fail` is set.
    pub fn fail_resource_creation(&self, fail: bool) {
        self.shared.fail_resources.store(fail, Ordering::Relaxed);
    }

    /// Heaps created so far, including released ones.
    pub fn heaps_created(&self) -> usize {
        self.shared.heaps_created.load(Ordering::Relaxed)
    }

    /// Heaps created and not yet released.
    pub fn live_heaps(&self) -> usize {
        self.shared.live_heaps.load(Ordering::Relaxed)
    }

    /// Buffers and textures created and not yet released.
    pub fn live_resources(&self) -> usize {
        self.shared.live_resources.load(Ordering::Relaxed)
    }

    /// Bytes reserved by live heaps.
    pub fn reserved_bytes(&self) -> u64 {
        self.shared.reserved_bytes.load(Ordering::Relaxed)
    }

    /// Heaps released while resources were still placed in them.
    pub fn heaps_released_in_use(&self) -> usize {
        self.shared.released_in_use.load(Ordering::Relaxed)
    }

    fn reserve_heap(&self, size: u32) -> Result<HeapId, GpuAllocError> {
        if size == 0 {
            return Err(GpuAllocError::InvalidSize);
        }
        if self.shared.fail_heaps.load(Ordering::Relaxed) {
            return Err(GpuAllocError::OutOfMemory);
        }

        let size = u64::from(size);
        let reserved = self.shared.reserved_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(budget) = self.heap_budget {
            if reserved + size > budget {
                self.shared.reserved_bytes.fetch_sub(size, Ordering::Relaxed);
                return Err(GpuAllocError::OutOfMemory);
            }
        }

        self.shared.heaps_created.fetch_add(1, Ordering::Relaxed);
        self.shared.live_heaps.fetch_add(1, Ordering::Relaxed);
        Ok(HeapId(next_id()))
    }

    fn unreserve_heap(&self, size: u32, placements: &Placements) {
        if !placements.is_empty() {
            self.shared.released_in_use.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.reserved_bytes.fetch_sub(u64::from(size), Ordering::Relaxed);
        self.shared.live_heaps.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for DummyDevice {
    type Buffer = DummyBuffer;
    type Texture = DummyTexture;
    type MemoryHeap = DummyMemoryHeap;
    type TextureHeap = DummyTextureHeap;

    fn create_memory_heap(&self, size: u32, class: MemoryClass) -> Result<DummyMemoryHeap, GpuAllocError> {
        if !class.is_buffer_class() {
            return Err(GpuAllocError::UnsupportedUsage);
        }
        let id = self.reserve_heap(size)?;
        Ok(DummyMemoryHeap {
            id,
            size,
            class,
            placements: Arc::new(Placements::default()),
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_texture_heap(&self, size: u32) -> Result<DummyTextureHeap, GpuAllocError> {
        let id = self.reserve_heap(size)?;
        Ok(DummyTextureHeap {
            id,
            size,
            texture_alignment: self.texture_alignment,
            placements: Arc::new(Placements::default()),
            shared: Arc::clone(&self.shared),
        })
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<TextureAllocationInfo, GpuAllocError> {
        let size_bytes = u32::try_from(texture_footprint(desc)?).map_err(|_| GpuAllocError::InvalidSize)?;
        Ok(TextureAllocationInfo {
            size_bytes,
            alignment: self.texture_alignment,
        })
    }

    fn release_buffer(&self, buffer: DummyBuffer) {
        buffer.placements.remove(buffer.offset, buffer.size);
        self.shared.live_resources.fetch_sub(1, Ordering::Relaxed);
    }

    fn release_texture(&self, texture: DummyTexture) {
        texture.placements.remove(texture.offset, texture.size);
        self.shared.live_resources.fetch_sub(1, Ordering::Relaxed);
    }

    fn release_memory_heap(&self, heap: DummyMemoryHeap) {
        self.unreserve_heap(heap.size, &heap.placements);
    }

    fn release_texture_heap(&self, heap: DummyTextureHeap) {
        self.unreserve_heap(heap.size, &heap.placements);
    }
}
