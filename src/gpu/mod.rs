//! GPU device abstraction
//!
//! The allocator only talks to a device through the traits in [`traits`].
//!
//! ## Backends
//! - `dummy`: bookkeeping-only device for tests (always available)
//! - `vulkan`: via the `ash` crate (enable `gpu-vulkan` feature)

// Always present: traits define the interface
pub mod traits;
pub use traits::{
    GpuAllocError, GpuDevice, GpuResource, HeapId, MemoryClass, MemoryHeap, ResourceId, TextureAllocationInfo,
    TextureDesc, TextureFormat, TextureHeap,
};

// Dummy device for testing (always available)
pub mod dummy;
pub use dummy::{DummyBuffer, DummyDevice, DummyMemoryHeap, DummyTexture, DummyTextureHeap};

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
