//! The main allocator interface.

use std::collections::HashMap;

use crate::allocators::block::Block;
use crate::allocators::index::{AllocEntry, AllocationIndex, LiveAllocation};
use crate::allocators::page::Page;
use crate::allocators::pool::PagePool;
use crate::api::config::{AllocatorConfig, ConfigError, PageReclaimPolicy, MAX_NUM_MIPMAPS};
use crate::api::error::AllocError;
use crate::api::stats::{AllocatorStats, ClassStats, PageInfo};
use crate::diagnostics::{self, GA101, GA102, GA103, GA201, GA301, GA302, GA901};
use crate::gpu::traits::{
    GpuAllocError, GpuDevice, GpuResource, HeapId, MemoryClass, MemoryHeap, TextureDesc, TextureHeap,
};
use crate::sync::mutex::{Mutex, MutexGuard};
use crate::util::layout::checked_align_up;

/// A texture returned by [`DynamicGpuAllocator::allocate_texture_2d`].
#[derive(Debug)]
pub struct AllocatedTexture<T> {
    /// The texture, owned by the caller until passed back to `deallocate_texture`
    pub texture: T,
    /// Bytes reserved for the texture, after alignment
    pub size_bytes: u32,
}

/// Everything guarded by the allocator lock.
struct AllocatorState<D: GpuDevice> {
    device_pages: PagePool<D::MemoryHeap>,
    upload_pages: PagePool<D::MemoryHeap>,
    texture_pages: PagePool<D::TextureHeap>,

    buffer_entries: AllocationIndex,
    texture_entries: AllocationIndex,

    /// Per-class totals, indexed by `MemoryClass::index`
    allocations: [u64; 3],
    deallocations: [u64; 3],

    /// Set once a failed `destroy` has reported the leak
    leak_reported: bool,
}

impl<D: GpuDevice> AllocatorState<D> {
    fn new() -> Self {
        Self {
            device_pages: PagePool::new(MemoryClass::Device),
            upload_pages: PagePool::new(MemoryClass::Upload),
            texture_pages: PagePool::new(MemoryClass::Texture),
            buffer_entries: AllocationIndex::new(),
            texture_entries: AllocationIndex::new(),
            allocations: [0; 3],
            deallocations: [0; 3],
            leak_reported: false,
        }
    }

    fn buffer_pool(&self, class: MemoryClass) -> Option<&PagePool<D::MemoryHeap>> {
        match class {
            MemoryClass::Device => Some(&self.device_pages),
            MemoryClass::Upload => Some(&self.upload_pages),
            MemoryClass::Texture => None,
        }
    }

    fn buffer_pool_mut(&mut self, class: MemoryClass) -> Option<&mut PagePool<D::MemoryHeap>> {
        match class {
            MemoryClass::Device => Some(&mut self.device_pages),
            MemoryClass::Upload => Some(&mut self.upload_pages),
            MemoryClass::Texture => None,
        }
    }

    fn num_pages(&self, class: MemoryClass) -> usize {
        match self.buffer_pool(class) {
            Some(pool) => pool.len(),
            None => self.texture_pages.len(),
        }
    }

    fn page_info(&self, class: MemoryClass, index: usize) -> Option<PageInfo> {
        match self.buffer_pool(class) {
            Some(pool) => pool.get(index).map(Page::info),
            None => self.texture_pages.get(index).map(Page::info),
        }
    }

    fn class_stats(&self, class: MemoryClass) -> ClassStats {
        let (num_pages, reserved_bytes, free_bytes) = match self.buffer_pool(class) {
            Some(pool) => pool_usage(pool),
            None => pool_usage(&self.texture_pages),
        };
        ClassStats {
            class,
            allocation_count: self.allocations[class.index()],
            deallocation_count: self.deallocations[class.index()],
            num_pages,
            reserved_bytes,
            free_bytes,
        }
    }

    fn live_in_pages(&self) -> u64 {
        let buffers: u64 = self
            .device_pages
            .iter()
            .chain(self.upload_pages.iter())
            .map(|page| page.num_allocations() as u64)
            .sum();
        let textures: u64 = self.texture_pages.iter().map(|page| page.num_allocations() as u64).sum();
        buffers + textures
    }
}

fn pool_usage<H>(pool: &PagePool<H>) -> (usize, u64, u64) {
    let reserved = pool.iter().map(|page| page.page_size() as u64).sum();
    let free = pool.iter().map(Page::free_bytes).sum();
    (pool.len(), reserved, free)
}

/// Carve `size` bytes out of `pool`, growing it by one page if no page has room.
///
/// A page created for this request is released again if placing the resource fails,
/// so a failed call leaves the pool as it found it.
fn allocate_in_pool<H, R>(
    pool: &mut PagePool<H>,
    config: &AllocatorConfig,
    size: u32,
    create_heap: impl FnOnce(u32) -> Result<(H, HeapId), GpuAllocError>,
    release_heap: impl Fn(H),
    create: impl FnOnce(&H, Block) -> Result<R, GpuAllocError>,
) -> Result<(Block, HeapId, R), AllocError> {
    let class = pool.class();
    let alignment = config.alignment(class);
    let aligned = checked_align_up(size, alignment).ok_or(AllocError::InvalidSize)?;

    let (index, fresh) = match pool.find_page(aligned) {
        Some(index) => (index, false),
        None => {
            // a retained empty page is too small here, so give up its slot
            if pool.len() >= config.max_pages_per_class && pool.num_empty() > 0 {
                let keep = pool.num_empty() - 1;
                for page in pool.drain_empty(keep) {
                    #[cfg(feature = "log")]
                    log::debug!("[gpualloc] released retained {} page {:?} to make room", class, page.heap_id());
                    release_heap(page.into_heap());
                }
            }
            if pool.len() >= config.max_pages_per_class {
                diagnostics::emit_with_context(&GA103, class.name());
                return Err(AllocError::PoolExhausted {
                    class,
                    max_pages: config.max_pages_per_class,
                });
            }

            let page_size = config.page_size(class).max(aligned);
            let (heap, heap_id) = create_heap(page_size).map_err(|err| {
                diagnostics::emit_with_context(&GA101, &format!("{} page of {} bytes: {}", class, page_size, err));
                AllocError::from(err)
            })?;

            #[cfg(feature = "log")]
            log::debug!("[gpualloc] new {} page {:?} of {} bytes", class, heap_id, page_size);

            (pool.push(Page::new(heap, heap_id, page_size)), true)
        }
    };

    let page = pool
        .get_mut(index)
        .ok_or(AllocError::Internal("selected page vanished"))?;
    let heap_id = page.heap_id();

    match page.allocate(size, alignment, create) {
        Ok((block, resource)) => Ok((block, heap_id, resource)),
        Err(err) => {
            if fresh {
                release_heap(pool.remove(index).into_heap());
            }
            if let AllocError::Device(cause) = &err {
                diagnostics::emit_with_context(&GA102, &format!("{} bytes in {} page: {}", size, class, cause));
            }
            Err(err)
        }
    }
}

/// Return `entry`'s block to its page, handing back the page if it should be reclaimed.
fn release_in_pool<H>(
    pool: &mut PagePool<H>,
    config: &AllocatorConfig,
    entry: &AllocEntry,
) -> Result<Option<Page<H>>, AllocError> {
    let Some(index) = pool.position_of(entry.heap_id) else {
        diagnostics::emit_with_context(&GA901, &format!("{} heap {:?}", entry.class, entry.heap_id));
        return Err(AllocError::Internal("allocation entry points at a missing page"));
    };

    let page = pool
        .get_mut(index)
        .ok_or(AllocError::Internal("resolved page vanished"))?;
    page.deallocate(entry.block, config.alignment(entry.class));

    if !page.is_empty() {
        return Ok(None);
    }

    let reclaim = match config.reclaim_policy {
        PageReclaimPolicy::Eager => true,
        PageReclaimPolicy::RetainEmpty { max_empty } => pool.num_empty() > max_empty,
    };
    Ok(reclaim.then(|| pool.remove(index)))
}

/// Sub-allocates device, upload and texture heaps into individually freeable
/// buffers and textures.
///
/// Every operation, queries included, runs under one lock, including the calls
/// into the device. Device implementations must never call back into the allocator.
///
/// # Example
///
/// ```rust
/// use dynamic_gpu_alloc::{DynamicGpuAllocator, DummyDevice, MemoryClass};
///
/// let alloc = DynamicGpuAllocator::new(DummyDevice::new());
///
/// let buffer = alloc.allocate_buffer(MemoryClass::Upload, 4096).unwrap();
/// assert_eq!(alloc.num_pages(MemoryClass::Upload), 1);
///
/// alloc.deallocate_buffer(buffer).unwrap();
/// assert_eq!(alloc.num_pages(MemoryClass::Upload), 0);
///
/// alloc.destroy().unwrap();
/// ```
pub struct DynamicGpuAllocator<D: GpuDevice> {
    device: D,
    config: AllocatorConfig,
    state: Mutex<AllocatorState<D>>,
}

impl<D: GpuDevice> DynamicGpuAllocator<D> {
    /// Create an allocator with the default configuration.
    pub fn new(device: D) -> Self {
        Self {
            device,
            config: AllocatorConfig::default(),
            state: Mutex::new(AllocatorState::new()),
        }
    }

    /// Create an allocator with a custom configuration.
    pub fn with_config(device: D, config: AllocatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            device,
            config,
            state: Mutex::new(AllocatorState::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState<D>> {
        self.state.lock()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a buffer of `size_bytes` from the device or upload pool.
    pub fn allocate_buffer(&self, class: MemoryClass, size_bytes: u32) -> Result<D::Buffer, AllocError> {
        if !class.is_buffer_class() {
            return Err(AllocError::UnsupportedClass(class));
        }
        if size_bytes == 0 {
            return Err(AllocError::InvalidSize);
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        let device = &self.device;
        let pool = state
            .buffer_pool_mut(class)
            .ok_or(AllocError::UnsupportedClass(class))?;

        let (block, heap_id, buffer) = allocate_in_pool(
            pool,
            &self.config,
            size_bytes,
            |page_size| {
                let heap = device.create_memory_heap(page_size, class)?;
                let id = heap.id();
                Ok((heap, id))
            },
            |heap| device.release_memory_heap(heap),
            |heap, block| heap.create_buffer(block.offset, block.size),
        )?;

        #[cfg(feature = "log")]
        log::trace!(
            "[gpualloc] {} buffer {} at {:?}+{} ({} bytes)",
            class,
            buffer.id(),
            heap_id,
            block.offset,
            block.size
        );

        state.buffer_entries.insert(buffer.id(), AllocEntry::new(block, class, heap_id));
        state.allocations[class.index()] += 1;
        Ok(buffer)
    }

    /// Allocate a 2D texture from the texture pool.
    pub fn allocate_texture_2d(&self, desc: TextureDesc) -> Result<AllocatedTexture<D::Texture>, AllocError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(AllocError::InvalidTextureDesc("zero width or height"));
        }
        if desc.num_mipmaps == 0 || desc.num_mipmaps > MAX_NUM_MIPMAPS {
            return Err(AllocError::InvalidTextureDesc("mipmap count out of range"));
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        let device = &self.device;

        let info = device.texture_allocation_info(&desc)?;
        if info.size_bytes == 0 {
            return Err(AllocError::InvalidSize);
        }
        if !info.alignment.is_power_of_two() || info.alignment > self.config.texture_alignment {
            return Err(AllocError::AlignmentFailed);
        }

        let (block, heap_id, texture) = allocate_in_pool(
            &mut state.texture_pages,
            &self.config,
            info.size_bytes,
            |page_size| {
                let heap = device.create_texture_heap(page_size)?;
                let id = heap.id();
                Ok((heap, id))
            },
            |heap| device.release_texture_heap(heap),
            |heap, block| heap.create_texture(&desc, block.offset, block.size),
        )?;

        #[cfg(feature = "log")]
        log::trace!(
            "[gpualloc] texture {} {}x{} ({} mips) at {:?}+{}",
            texture.id(),
            desc.width,
            desc.height,
            desc.num_mipmaps,
            heap_id,
            block.offset
        );

        state
            .texture_entries
            .insert(texture.id(), AllocEntry::new(block, MemoryClass::Texture, heap_id));
        state.allocations[MemoryClass::Texture.index()] += 1;
        Ok(AllocatedTexture {
            texture,
            size_bytes: block.size,
        })
    }

    // =========================================================================
    // Deallocation
    // =========================================================================

    /// Release a buffer returned by [`allocate_buffer`](Self::allocate_buffer).
    ///
    /// Passing a buffer that is not live in this allocator is a caller error:
    /// it emits `GA201` (fatal in strict mode) and returns `InvalidHandle`.
    pub fn deallocate_buffer(&self, buffer: D::Buffer) -> Result<(), AllocError> {
        let id = buffer.id();
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(entry) = state.buffer_entries.remove(id) else {
            drop(guard);
            diagnostics::emit_with_context(&GA201, &format!("buffer {}", id));
            return Err(AllocError::InvalidHandle(id));
        };

        self.device.release_buffer(buffer);

        let pool = state
            .buffer_pool_mut(entry.class)
            .ok_or(AllocError::Internal("buffer entry in texture class"))?;
        if let Some(page) = release_in_pool(pool, &self.config, &entry)? {
            #[cfg(feature = "log")]
            log::debug!("[gpualloc] released empty {} page {:?}", entry.class, page.heap_id());
            self.device.release_memory_heap(page.into_heap());
        }

        state.deallocations[entry.class.index()] += 1;
        Ok(())
    }

    /// Release a texture returned by [`allocate_texture_2d`](Self::allocate_texture_2d).
    ///
    /// Passing a texture that is not live in this allocator is a caller error:
    /// it emits `GA201` (fatal in strict mode) and returns `InvalidHandle`.
    pub fn deallocate_texture(&self, texture: D::Texture) -> Result<(), AllocError> {
        let id = texture.id();
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(entry) = state.texture_entries.remove(id) else {
            drop(guard);
            diagnostics::emit_with_context(&GA201, &format!("texture {}", id));
            return Err(AllocError::InvalidHandle(id));
        };

        self.device.release_texture(texture);

        if let Some(page) = release_in_pool(&mut state.texture_pages, &self.config, &entry)? {
            #[cfg(feature = "log")]
            log::debug!("[gpualloc] released empty texture page {:?}", page.heap_id());
            self.device.release_texture_heap(page.into_heap());
        }

        state.deallocations[MemoryClass::Texture.index()] += 1;
        Ok(())
    }

    /// Release every empty page kept alive by [`PageReclaimPolicy::RetainEmpty`].
    ///
    /// Returns the number of pages released.
    pub fn trim_empty_pages(&self) -> usize {
        let mut state = self.lock();
        let mut released = 0;
        for class in [MemoryClass::Device, MemoryClass::Upload] {
            if let Some(pool) = state.buffer_pool_mut(class) {
                for page in pool.drain_empty(0) {
                    self.device.release_memory_heap(page.into_heap());
                    released += 1;
                }
            }
        }
        for page in state.texture_pages.drain_empty(0) {
            self.device.release_texture_heap(page.into_heap());
            released += 1;
        }
        released
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Total allocations ever made from `class`.
    pub fn total_allocations(&self, class: MemoryClass) -> u64 {
        self.lock().allocations[class.index()]
    }

    /// Total deallocations ever made to `class`.
    pub fn total_deallocations(&self, class: MemoryClass) -> u64 {
        self.lock().deallocations[class.index()]
    }

    /// Size of a new page in `class`, unless a single request needs more.
    pub fn default_page_size(&self, class: MemoryClass) -> u32 {
        self.config.page_size(class)
    }

    /// Number of pages currently in the pool of `class`.
    pub fn num_pages(&self, class: MemoryClass) -> usize {
        self.lock().num_pages(class)
    }

    /// Bookkeeping of the page at `index` in the pool of `class`.
    pub fn page_info(&self, class: MemoryClass, index: usize) -> Option<PageInfo> {
        self.lock().page_info(class, index)
    }

    /// Free list of the page at `index` in the pool of `class`, sorted by offset.
    pub fn free_blocks(&self, class: MemoryClass, index: usize) -> Option<Vec<Block>> {
        let state = self.lock();
        match state.buffer_pool(class) {
            Some(pool) => pool.get(index).map(|page| page.free_blocks().to_vec()),
            None => state.texture_pages.get(index).map(|page| page.free_blocks().to_vec()),
        }
    }

    /// Snapshot of every pool.
    pub fn stats(&self) -> AllocatorStats {
        let state = self.lock();
        AllocatorStats {
            classes: MemoryClass::ALL.map(|class| state.class_stats(class)),
        }
    }

    /// Every allocation that has not been deallocated yet.
    pub fn live_allocations(&self) -> Vec<LiveAllocation> {
        let state = self.lock();
        state
            .buffer_entries
            .live()
            .chain(state.texture_entries.live())
            .collect()
    }

    /// Verify page free lists and cross-check them against the allocation index
    /// and counters.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        let state = self.lock();

        for class in MemoryClass::ALL {
            let alignment = self.config.alignment(class);
            let live_in_pages: u64 = match state.buffer_pool(class) {
                Some(pool) => {
                    for page in pool.iter() {
                        page.check_invariants(alignment)?;
                    }
                    pool.iter().map(|p| p.num_allocations() as u64).sum()
                }
                None => {
                    for page in state.texture_pages.iter() {
                        page.check_invariants(alignment)?;
                    }
                    state.texture_pages.iter().map(|p| p.num_allocations() as u64).sum()
                }
            };
            let live_by_count = state.allocations[class.index()]
                .checked_sub(state.deallocations[class.index()])
                .ok_or("more deallocations than allocations")?;
            if live_by_count != live_in_pages {
                return Err("page allocation counts disagree with class counters");
            }
        }

        let indexed = (state.buffer_entries.len() + state.texture_entries.len()) as u64;
        if indexed != state.live_in_pages() {
            return Err("allocation index disagrees with page allocation counts");
        }

        let mut allocated: HashMap<HeapId, u64> = HashMap::new();
        for entry in state.buffer_entries.entries().chain(state.texture_entries.entries()) {
            *allocated.entry(entry.heap_id).or_default() += entry.block.size as u64;
        }
        let pages = state
            .device_pages
            .iter()
            .chain(state.upload_pages.iter())
            .map(|page| (page.heap_id(), page.page_size(), page.free_bytes()))
            .chain(
                state
                    .texture_pages
                    .iter()
                    .map(|page| (page.heap_id(), page.page_size(), page.free_bytes())),
            );
        for (heap_id, page_size, free) in pages {
            let used = allocated.remove(&heap_id).unwrap_or(0);
            if free + used != page_size as u64 {
                return Err("free and allocated bytes do not add up to the page size");
            }
        }
        if !allocated.is_empty() {
            return Err("allocation index points at a missing page");
        }
        Ok(())
    }

    /// The device this allocator places resources on.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The configuration in use.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tear the allocator down, releasing every page.
    ///
    /// Every buffer and texture must have been deallocated first. Otherwise this
    /// emits `GA301` and fails; the pages are still released when the allocator drops.
    pub fn destroy(mut self) -> Result<(), AllocError> {
        let state = self.state.get_mut();

        let unbalanced = MemoryClass::ALL
            .into_iter()
            .find(|class| state.allocations[class.index()] != state.deallocations[class.index()]);
        let failure = if let Some(class) = unbalanced {
            Some(AllocError::Unbalanced {
                class,
                allocations: state.allocations[class.index()],
                deallocations: state.deallocations[class.index()],
            })
        } else {
            let indexed_empty = state.buffer_entries.is_empty() && state.texture_entries.is_empty();
            (!indexed_empty || state.live_in_pages() != 0)
                .then_some(AllocError::Internal("balanced counters with live allocations"))
        };

        if let Some(err) = failure {
            state.leak_reported = true;
            diagnostics::emit_with_context(&GA301, &err.to_string());
            return Err(err);
        }

        self.release_all_pages();
        Ok(())
    }

    fn release_all_pages(&mut self) {
        let state = self.state.get_mut();
        for page in state.device_pages.take_all().into_iter().chain(state.upload_pages.take_all()) {
            self.device.release_memory_heap(page.into_heap());
        }
        for page in state.texture_pages.take_all() {
            self.device.release_texture_heap(page.into_heap());
        }
    }
}

impl<D: GpuDevice> Drop for DynamicGpuAllocator<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let live = state.buffer_entries.len() + state.texture_entries.len();
        if live != 0 && !state.leak_reported && !std::thread::panicking() {
            diagnostics::emit_with_context(&GA302, &format!("{} live allocations", live));
        }
        self.release_all_pages();
    }
}
