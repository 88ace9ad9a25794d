//! Integration tests for dynamic-gpu-alloc.

use dynamic_gpu_alloc::{
    kb, mb, AllocError, AllocatorConfig, Block, DummyDevice, DynamicGpuAllocator, GpuAllocError, GpuResource, MemoryClass,
    PageReclaimPolicy, TextureDesc, TextureFormat,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

fn small_alloc() -> DynamicGpuAllocator<DummyDevice> {
    DynamicGpuAllocator::with_config(DummyDevice::new(), AllocatorConfig::small_pages()).unwrap()
}

/// Small pages, but enough of them for randomized workloads.
fn roomy_alloc() -> DynamicGpuAllocator<DummyDevice> {
    let config = AllocatorConfig::small_pages().with_max_pages(256);
    DynamicGpuAllocator::with_config(DummyDevice::new(), config).unwrap()
}

#[test]
fn test_default_page_sizes() {
    let alloc = DynamicGpuAllocator::new(DummyDevice::new());
    assert_eq!(alloc.default_page_size(MemoryClass::Device), mb(64));
    assert_eq!(alloc.default_page_size(MemoryClass::Upload), mb(32));
    assert_eq!(alloc.default_page_size(MemoryClass::Texture), mb(64));

    for class in [MemoryClass::Device, MemoryClass::Upload, MemoryClass::Texture] {
        assert_eq!(alloc.num_pages(class), 0);
        assert_eq!(alloc.total_allocations(class), 0);
        assert!(alloc.page_info(class, 0).is_none());
    }
}

#[test]
fn test_first_allocation_creates_default_page() {
    let alloc = DynamicGpuAllocator::new(DummyDevice::new());

    let buffer = alloc.allocate_buffer(MemoryClass::Device, 1).unwrap();
    let info = alloc.page_info(MemoryClass::Device, 0).unwrap();
    assert_eq!(info.page_size_bytes, mb(64));
    assert_eq!(info.num_allocations, 1);
    assert_eq!(info.largest_free_block_bytes, mb(64) - kb(64));
    assert_eq!(alloc.device().reserved_bytes(), mb(64) as u64);

    alloc.deallocate_buffer(buffer).unwrap();
    assert_eq!(alloc.device().reserved_bytes(), 0);
    alloc.destroy().unwrap();
}

#[test]
fn test_blocks_are_placed_first_fit() {
    let alloc = small_alloc();

    let a = alloc.allocate_buffer(MemoryClass::Upload, kb(64)).unwrap();
    let b = alloc.allocate_buffer(MemoryClass::Upload, kb(100)).unwrap();
    let c = alloc.allocate_buffer(MemoryClass::Upload, kb(64)).unwrap();
    assert_eq!((a.offset(), b.offset(), c.offset()), (0, kb(64), kb(192)));
    assert_eq!(b.size(), kb(128));

    // freeing the middle leaves a hole that the next small request fills
    alloc.deallocate_buffer(b).unwrap();
    let info = alloc.page_info(MemoryClass::Upload, 0).unwrap();
    assert_eq!(info.num_free_blocks, 2);

    let d = alloc.allocate_buffer(MemoryClass::Upload, kb(64)).unwrap();
    assert_eq!(d.offset(), kb(64));

    alloc.deallocate_buffer(a).unwrap();
    alloc.deallocate_buffer(c).unwrap();
    alloc.deallocate_buffer(d).unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_free_blocks_coalesce() {
    let alloc = small_alloc();
    let buffers: Vec<_> = (0..4)
        .map(|_| alloc.allocate_buffer(MemoryClass::Device, kb(64)).unwrap())
        .collect();
    let keep = alloc.allocate_buffer(MemoryClass::Device, kb(64)).unwrap();

    // free out of order; neighbours must merge back into one block
    let mut buffers = buffers.into_iter();
    let (b0, b1, b2, b3) = (
        buffers.next().unwrap(),
        buffers.next().unwrap(),
        buffers.next().unwrap(),
        buffers.next().unwrap(),
    );
    alloc.deallocate_buffer(b1).unwrap();
    alloc.deallocate_buffer(b3).unwrap();
    assert_eq!(alloc.page_info(MemoryClass::Device, 0).unwrap().num_free_blocks, 3);
    alloc.deallocate_buffer(b2).unwrap();
    alloc.deallocate_buffer(b0).unwrap();

    let info = alloc.page_info(MemoryClass::Device, 0).unwrap();
    assert_eq!(info.num_free_blocks, 2);
    assert_eq!(info.largest_free_block_bytes, mb(1) - kb(5 * 64));
    assert_eq!(
        alloc.free_blocks(MemoryClass::Device, 0).unwrap(),
        vec![Block::new(0, kb(256)), Block::new(kb(320), mb(1) - kb(320))]
    );

    // the merged run at the start holds a request larger than any single freed block
    let big = alloc.allocate_buffer(MemoryClass::Device, kb(256)).unwrap();
    assert_eq!(big.offset(), 0);

    alloc.deallocate_buffer(big).unwrap();
    alloc.deallocate_buffer(keep).unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_page_selection_skips_fragmented_pages() {
    let alloc = small_alloc();

    // fill the first page, then punch two non-adjacent holes into it
    let mut first: Vec<_> = (0..16)
        .map(|_| alloc.allocate_buffer(MemoryClass::Device, kb(64)).unwrap())
        .collect();
    alloc.deallocate_buffer(first.remove(4)).unwrap();
    alloc.deallocate_buffer(first.remove(8)).unwrap();

    // 128 KiB fits in neither hole, so a second page is created
    let wide = alloc.allocate_buffer(MemoryClass::Device, kb(128)).unwrap();
    assert_eq!(alloc.num_pages(MemoryClass::Device), 2);
    assert_ne!(wide.heap_id(), first[0].heap_id());

    // 64 KiB goes back into the first page
    let narrow = alloc.allocate_buffer(MemoryClass::Device, kb(64)).unwrap();
    assert_eq!(narrow.heap_id(), first[0].heap_id());

    alloc.deallocate_buffer(wide).unwrap();
    alloc.deallocate_buffer(narrow).unwrap();
    for buffer in first {
        alloc.deallocate_buffer(buffer).unwrap();
    }
    assert_eq!(alloc.num_pages(MemoryClass::Device), 0);
    alloc.destroy().unwrap();
}

#[test]
fn test_page_removal_keeps_other_pages_addressable() {
    let alloc = small_alloc();
    let a = alloc.allocate_buffer(MemoryClass::Upload, mb(1)).unwrap();
    let b = alloc.allocate_buffer(MemoryClass::Upload, mb(1)).unwrap();
    let c = alloc.allocate_buffer(MemoryClass::Upload, mb(1)).unwrap();
    assert_eq!(alloc.num_pages(MemoryClass::Upload), 3);

    alloc.deallocate_buffer(b).unwrap();
    assert_eq!(alloc.num_pages(MemoryClass::Upload), 2);

    // the pages behind the removed one still resolve
    alloc.deallocate_buffer(c).unwrap();
    alloc.deallocate_buffer(a).unwrap();
    assert_eq!(alloc.num_pages(MemoryClass::Upload), 0);
    assert_eq!(alloc.device().live_heaps(), 0);
    alloc.destroy().unwrap();
}

#[test]
fn test_textures_use_their_own_pool() {
    let alloc = small_alloc();
    let desc = TextureDesc::new(TextureFormat::Rgba8Unorm, 128, 128, 8);

    let texture = alloc.allocate_texture_2d(desc).unwrap();
    let buffer = alloc.allocate_buffer(MemoryClass::Device, kb(64)).unwrap();
    assert_eq!(alloc.num_pages(MemoryClass::Texture), 1);
    assert_eq!(alloc.num_pages(MemoryClass::Device), 1);
    assert_eq!(texture.texture.desc(), &desc);
    assert_eq!(texture.size_bytes % kb(64), 0);
    assert!(texture.size_bytes >= 128 * 128 * 4);

    alloc.deallocate_texture(texture.texture).unwrap();
    alloc.deallocate_buffer(buffer).unwrap();
    assert_eq!(alloc.total_deallocations(MemoryClass::Texture), 1);
    alloc.destroy().unwrap();
}

#[test]
fn test_oversized_texture_gets_own_page() {
    let alloc = small_alloc();
    // 1024 * 1024 * 4 bytes is four times the small page size
    let desc = TextureDesc::new(TextureFormat::Rgba8Unorm, 1024, 1024, 1);

    let texture = alloc.allocate_texture_2d(desc).unwrap();
    assert_eq!(texture.size_bytes, mb(4));
    let info = alloc.page_info(MemoryClass::Texture, 0).unwrap();
    assert_eq!(info.page_size_bytes, mb(4));
    assert_eq!(info.largest_free_block_bytes, 0);

    alloc.deallocate_texture(texture.texture).unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_texture_alignment_the_pages_cannot_honor() {
    let device = DummyDevice::new().with_texture_alignment(kb(256));
    let alloc = DynamicGpuAllocator::with_config(device, AllocatorConfig::small_pages()).unwrap();
    let desc = TextureDesc::new(TextureFormat::R8Unorm, 16, 16, 1);

    assert_eq!(alloc.allocate_texture_2d(desc).unwrap_err(), AllocError::AlignmentFailed);
    assert_eq!(alloc.num_pages(MemoryClass::Texture), 0);
}

#[test]
fn test_size_overflow_is_rejected() {
    let alloc = small_alloc();
    assert_eq!(
        alloc.allocate_buffer(MemoryClass::Device, u32::MAX).unwrap_err(),
        AllocError::InvalidSize
    );
    assert_eq!(alloc.num_pages(MemoryClass::Device), 0);
}

#[test]
fn test_device_out_of_memory() {
    let device = DummyDevice::new().with_heap_budget(mb(2) as u64);
    let alloc = DynamicGpuAllocator::with_config(device, AllocatorConfig::small_pages()).unwrap();

    let a = alloc.allocate_buffer(MemoryClass::Device, mb(1)).unwrap();
    let b = alloc.allocate_buffer(MemoryClass::Upload, mb(1)).unwrap();
    assert_eq!(
        alloc.allocate_buffer(MemoryClass::Device, 1).unwrap_err(),
        AllocError::Device(GpuAllocError::OutOfMemory)
    );

    // freeing a page makes room again
    alloc.deallocate_buffer(b).unwrap();
    let c = alloc.allocate_buffer(MemoryClass::Device, 1).unwrap();

    alloc.deallocate_buffer(a).unwrap();
    alloc.deallocate_buffer(c).unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_double_free_is_reported() {
    let alloc = small_alloc();
    let texture = alloc
        .allocate_texture_2d(TextureDesc::new(TextureFormat::R32Float, 32, 32, 1))
        .unwrap()
        .texture;
    let copy = texture.forge_copy();

    alloc.deallocate_texture(texture).unwrap();
    let id = copy.id();
    assert_eq!(alloc.deallocate_texture(copy).unwrap_err(), AllocError::InvalidHandle(id));
    assert_eq!(alloc.total_deallocations(MemoryClass::Texture), 1);
    assert!(alloc.check_invariants().is_ok());
    alloc.destroy().unwrap();
}

#[test]
fn test_foreign_handle_is_rejected() {
    let alloc = small_alloc();
    let other = small_alloc();
    let foreign = other.allocate_buffer(MemoryClass::Device, 100).unwrap();
    let copy = foreign.forge_copy();

    assert!(matches!(alloc.deallocate_buffer(copy), Err(AllocError::InvalidHandle(_))));
    assert_eq!(alloc.total_deallocations(MemoryClass::Device), 0);

    other.deallocate_buffer(foreign).unwrap();
    other.destroy().unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_destroy_reports_leak() {
    let alloc = small_alloc();
    let leaked = alloc
        .allocate_texture_2d(TextureDesc::new(TextureFormat::Rgba8Unorm, 8, 8, 1))
        .unwrap();
    let live = alloc.live_allocations();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].class, MemoryClass::Texture);
    assert_eq!(live[0].resource, leaked.texture.id());

    assert!(matches!(alloc.destroy(), Err(AllocError::Unbalanced { class: MemoryClass::Texture, .. })));
}

#[test]
fn test_drop_releases_pages() {
    let device = DummyDevice::new();
    let stats;
    {
        let alloc = DynamicGpuAllocator::with_config(device.clone(), AllocatorConfig::small_pages()).unwrap();
        let _a = alloc.allocate_buffer(MemoryClass::Device, 100).unwrap();
        let _b = alloc.allocate_buffer(MemoryClass::Upload, 100).unwrap();
        assert_eq!(device.live_heaps(), 2);
        stats = alloc.stats();
    }
    assert_eq!(stats.active_allocations(), 2);
    assert_eq!(stats.total_reserved(), 2 * mb(1) as u64);
    assert_eq!(device.live_heaps(), 0);
    assert_eq!(device.reserved_bytes(), 0);
}

#[test]
fn test_retained_pages_are_trimmed() {
    let config = AllocatorConfig::small_pages().with_reclaim_policy(PageReclaimPolicy::RetainEmpty { max_empty: 2 });
    let alloc = DynamicGpuAllocator::with_config(DummyDevice::new(), config).unwrap();

    let buffers: Vec<_> = (0..3)
        .map(|_| alloc.allocate_buffer(MemoryClass::Upload, mb(1)).unwrap())
        .collect();
    for buffer in buffers {
        alloc.deallocate_buffer(buffer).unwrap();
    }
    assert_eq!(alloc.num_pages(MemoryClass::Upload), 2);
    assert_eq!(alloc.device().live_heaps(), 2);

    assert_eq!(alloc.trim_empty_pages(), 2);
    assert_eq!(alloc.device().live_heaps(), 0);
    alloc.destroy().unwrap();
}

#[test]
fn test_multithreaded_allocations() {
    let alloc = Arc::new(roomy_alloc());
    let num_threads = 4;
    let iterations = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let alloc = Arc::clone(&alloc);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(thread_id);
                let mut buffers = Vec::new();
                let mut textures = Vec::new();

                for i in 0..iterations {
                    match rng.gen_range(0..4) {
                        0 | 1 => {
                            let class = if rng.gen_bool(0.5) {
                                MemoryClass::Device
                            } else {
                                MemoryClass::Upload
                            };
                            let size = rng.gen_range(1..=kb(192));
                            let buffer = alloc
                                .allocate_buffer(class, size)
                                .unwrap_or_else(|e| panic!("Thread {} alloc {} failed: {}", thread_id, i, e));
                            assert!(buffer.size() >= size);
                            buffers.push(buffer);
                        }
                        2 => {
                            let side = 1 << rng.gen_range(2..8);
                            let desc = TextureDesc::new(TextureFormat::Rgba8Unorm, side, side, 1);
                            textures.push(alloc.allocate_texture_2d(desc).unwrap().texture);
                        }
                        _ => {
                            if i % 16 == 0 {
                                alloc
                                    .check_invariants()
                                    .unwrap_or_else(|e| panic!("Thread {} step {}: {}", thread_id, i, e));
                            }
                            if !buffers.is_empty() {
                                let index = rng.gen_range(0..buffers.len());
                                alloc.deallocate_buffer(buffers.swap_remove(index)).unwrap();
                            }
                            if !textures.is_empty() && rng.gen_bool(0.5) {
                                let index = rng.gen_range(0..textures.len());
                                alloc.deallocate_texture(textures.swap_remove(index)).unwrap();
                            }
                        }
                    }
                }

                (buffers, textures)
            })
        })
        .collect();

    let survivors: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    // every thread is done, but their survivors are still live
    let live = alloc.live_allocations().len();
    assert_eq!(live, survivors.iter().map(|(b, t)| b.len() + t.len()).sum::<usize>());
    assert!(live > 0);
    alloc.check_invariants().unwrap();

    for (buffers, textures) in survivors {
        for buffer in buffers {
            alloc.deallocate_buffer(buffer).unwrap();
        }
        for texture in textures {
            alloc.deallocate_texture(texture).unwrap();
        }
    }

    alloc.check_invariants().unwrap();
    for class in [MemoryClass::Device, MemoryClass::Upload, MemoryClass::Texture] {
        assert_eq!(alloc.total_allocations(class), alloc.total_deallocations(class));
        assert_eq!(alloc.num_pages(class), 0);
    }
    assert_eq!(alloc.device().live_resources(), 0);
    assert_eq!(alloc.device().heaps_released_in_use(), 0);

    let alloc = Arc::try_unwrap(alloc).ok().unwrap();
    alloc.destroy().unwrap();
}

#[test]
fn test_randomized_sequence_keeps_invariants() {
    let alloc = roomy_alloc();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live = Vec::new();

    for _ in 0..500 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..=mb(2));
            live.push(alloc.allocate_buffer(MemoryClass::Device, size).unwrap());
        } else {
            let index = rng.gen_range(0..live.len());
            alloc.deallocate_buffer(live.swap_remove(index)).unwrap();
        }
        assert!(alloc.check_invariants().is_ok());
    }

    let stats = alloc.stats();
    assert_eq!(stats.class(MemoryClass::Device).active_allocations(), live.len() as u64);

    for buffer in live {
        alloc.deallocate_buffer(buffer).unwrap();
    }
    assert_eq!(alloc.num_pages(MemoryClass::Device), 0);
    alloc.destroy().unwrap();
}
