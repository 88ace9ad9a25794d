//! # dynamic-gpu-alloc
//!
//! Page-based sub-allocation of GPU memory for device buffers, upload buffers
//! and 2D textures.
//!
//! ## Features
//!
//! - One pool of pages per memory class (device, upload, texture)
//! - First-fit placement with 64 KiB granularity and coalescing on free
//! - Oversized requests get a dedicated page
//! - Empty pages are released immediately, or retained for reuse
//! - Backend-agnostic: any [`GpuDevice`] implementation, Vulkan via `ash` included
//! - Coded diagnostics with an optional strict mode
//!
//! ## Quick Start
//!
//! ```rust
//! use dynamic_gpu_alloc::{DynamicGpuAllocator, DummyDevice, MemoryClass, TextureDesc, TextureFormat};
//!
//! let alloc = DynamicGpuAllocator::new(DummyDevice::new());
//!
//! let vertices = alloc.allocate_buffer(MemoryClass::Device, 1 << 20).unwrap();
//! let albedo = alloc
//!     .allocate_texture_2d(TextureDesc::new(TextureFormat::Rgba8Unorm, 1024, 1024, 11))
//!     .unwrap();
//!
//! alloc.deallocate_texture(albedo.texture).unwrap();
//! alloc.deallocate_buffer(vertices).unwrap();
//! alloc.destroy().unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `gpu-vulkan`: Vulkan device backend
//! - `parking_lot`: faster mutex
//! - `debug`: allocation backtraces in [`LiveAllocation`]
//! - `diagnostics`: print diagnostics in release builds too
//! - `log`: route diagnostics and page events through the `log` crate

pub mod api;
pub mod diagnostics;
pub mod gpu;

mod allocators;
mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::alloc::{AllocatedTexture, DynamicGpuAllocator};
pub use api::config::{AllocatorConfig, ConfigError, PageReclaimPolicy};
pub use api::error::AllocError;
pub use api::stats::{AllocatorStats, ClassStats, PageInfo};

pub use allocators::block::Block;
pub use allocators::index::LiveAllocation;

// Device capability
pub use gpu::{
    GpuAllocError, GpuDevice, GpuResource, HeapId, MemoryClass, MemoryHeap, ResourceId, TextureAllocationInfo,
    TextureDesc, TextureFormat, TextureHeap,
};
pub use gpu::{DummyBuffer, DummyDevice, DummyTexture};

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_strict_mode, StrictMode, StrictModeGuard};
pub use diagnostics::{GA101, GA102, GA103, GA201, GA301, GA302, GA901};

pub use util::size::{format_bytes, kb, mb};
