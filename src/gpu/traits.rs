//! Device capability traits and types
//!
//! This module defines the interface the allocator uses to create heaps and place
//! resources inside them, WITHOUT pulling in any backend-specific dependencies.
//! The allocator depends on these traits, never on a concrete backend.

use std::fmt;

/// Errors reported by a device when creating heaps or resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuAllocError {
    /// Out of memory
    OutOfMemory,
    /// Invalid heap or resource size
    InvalidSize,
    /// Unsupported memory class or texture format
    UnsupportedUsage,
    /// Alignment requirements not met
    AlignmentFailed,
    /// Backend-specific error (opaque)
    BackendError(String),
}

impl fmt::Display for GpuAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuAllocError::OutOfMemory => write!(f, "GPU out of memory"),
            GpuAllocError::InvalidSize => write!(f, "Invalid heap or resource size"),
            GpuAllocError::UnsupportedUsage => write!(f, "Unsupported memory class or format"),
            GpuAllocError::AlignmentFailed => write!(f, "Alignment requirements not met"),
            GpuAllocError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for GpuAllocError {}

/// Memory class - each class has its own pool of pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// GPU-only memory, fastest for shaders
    Device,
    /// CPU-writable memory used to upload data to the GPU
    Upload,
    /// Memory for 2D textures
    Texture,
}

impl MemoryClass {
    /// All memory classes, in pool order.
    pub const ALL: [MemoryClass; 3] = [MemoryClass::Device, MemoryClass::Upload, MemoryClass::Texture];

    /// Index of the class into per-class tables.
    pub const fn index(self) -> usize {
        match self {
            MemoryClass::Device => 0,
            MemoryClass::Upload => 1,
            MemoryClass::Texture => 2,
        }
    }

    /// Lowercase name for reports.
    pub const fn name(self) -> &'static str {
        match self {
            MemoryClass::Device => "device",
            MemoryClass::Upload => "upload",
            MemoryClass::Texture => "texture",
        }
    }

    /// Whether buffers can be placed in this class.
    pub const fn is_buffer_class(self) -> bool {
        matches!(self, MemoryClass::Device | MemoryClass::Upload)
    }
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque identity of a heap created by a device.
///
/// Only ever compared for equality; used to find the owning page again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u64);

/// Opaque identity of a buffer or texture created by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Pixel format of a 2D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm | TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rg16Float
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Description of a 2D texture to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Texel format
    pub format: TextureFormat,
    /// Width of mip level 0 in texels
    pub width: u32,
    /// Height of mip level 0 in texels
    pub height: u32,
    /// Number of mip levels, including level 0
    pub num_mipmaps: u32,
}

impl TextureDesc {
    /// Create a new texture description
    pub fn new(format: TextureFormat, width: u32, height: u32, num_mipmaps: u32) -> Self {
        Self {
            format,
            width,
            height,
            num_mipmaps,
        }
    }
}

/// Size and alignment a device needs to place a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureAllocationInfo {
    /// Required size in bytes
    pub size_bytes: u32,
    /// Required placement alignment in bytes
    pub alignment: u32,
}

/// A resource created by a device (buffer or texture)
pub trait GpuResource: Send {
    /// Identity used as the allocation index key
    fn id(&self) -> ResourceId;
}

/// A heap buffers can be placed in
pub trait MemoryHeap: Send {
    /// Buffer type created in this heap
    type Buffer: GpuResource;

    /// Identity of this heap
    fn id(&self) -> HeapId;

    /// Place a buffer at `offset` with `size` bytes
    fn create_buffer(&self, offset: u32, size: u32) -> Result<Self::Buffer, GpuAllocError>;
}

/// A heap textures can be placed in
pub trait TextureHeap: Send {
    /// Texture type created in this heap
    type Texture: GpuResource;

    /// Identity of this heap
    fn id(&self) -> HeapId;

    /// Place a texture described by `desc` at `offset` with `size` bytes
    fn create_texture(
        &self,
        desc: &TextureDesc,
        offset: u32,
        size: u32,
    ) -> Result<Self::Texture, GpuAllocError>;
}

/// The external device capability the allocator sub-allocates from.
///
/// Calls are made while the allocator lock is held, so implementations
/// must never call back into the allocator.
pub trait GpuDevice: Send + Sync {
    /// Buffer handle type
    type Buffer: GpuResource;
    /// Texture handle type
    type Texture: GpuResource;
    /// Heap used by the device and upload pools
    type MemoryHeap: MemoryHeap<Buffer = Self::Buffer>;
    /// Heap used by the texture pool
    type TextureHeap: TextureHeap<Texture = Self::Texture>;

    /// Create a heap of `size` bytes for buffers of `class`
    fn create_memory_heap(&self, size: u32, class: MemoryClass) -> Result<Self::MemoryHeap, GpuAllocError>;

    /// Create a heap of `size` bytes for textures
    fn create_texture_heap(&self, size: u32) -> Result<Self::TextureHeap, GpuAllocError>;

    /// Query how much memory a texture needs
    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<TextureAllocationInfo, GpuAllocError>;

    /// Release a buffer created by one of this device's heaps
    fn release_buffer(&self, buffer: Self::Buffer);

    /// Release a texture created by one of this device's heaps
    fn release_texture(&self, texture: Self::Texture);

    /// Release a memory heap; all of its buffers have been released
    fn release_memory_heap(&self, heap: Self::MemoryHeap);

    /// Release a texture heap; all of its textures have been released
    fn release_texture_heap(&self, heap: Self::TextureHeap);
}
