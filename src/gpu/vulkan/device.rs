//! Vulkan device implementation

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use super::super::traits::{
    GpuAllocError, GpuDevice, GpuResource, HeapId, MemoryClass, MemoryHeap, ResourceId, TextureAllocationInfo,
    TextureDesc, TextureFormat, TextureHeap,
};

/// Buffer placed in a [`VulkanMemoryHeap`]
pub struct VulkanBuffer {
    /// Raw Vulkan buffer handle
    pub vk_buffer: vk::Buffer,
    /// Offset in the owning heap
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

impl GpuResource for VulkanBuffer {
    fn id(&self) -> ResourceId {
        ResourceId(self.vk_buffer.as_raw())
    }
}

/// Image placed in a [`VulkanTextureHeap`]
pub struct VulkanTexture {
    /// Raw Vulkan image handle
    pub vk_image: vk::Image,
    /// Offset in the owning heap
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

impl GpuResource for VulkanTexture {
    fn id(&self) -> ResourceId {
        ResourceId(self.vk_image.as_raw())
    }
}

/// One `VkDeviceMemory` allocation that buffers are bound into
pub struct VulkanMemoryHeap {
    /// Raw Vulkan device memory handle
    pub vk_memory: vk::DeviceMemory,
    class: MemoryClass,
    device: Arc<ash::Device>,
}

impl MemoryHeap for VulkanMemoryHeap {
    type Buffer = VulkanBuffer;

    fn id(&self) -> HeapId {
        HeapId(self.vk_memory.as_raw())
    }

    fn create_buffer(&self, offset: u32, size: u32) -> Result<VulkanBuffer, GpuAllocError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(u64::from(size))
            .usage(buffer_usage(self.class))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let vk_buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(|e| GpuAllocError::BackendError(e.to_string()))?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(vk_buffer) };
        if requirements.size > u64::from(size) || u64::from(offset) % requirements.alignment != 0 {
            unsafe { self.device.destroy_buffer(vk_buffer, None) };
            return Err(GpuAllocError::AlignmentFailed);
        }

        if let Err(e) = unsafe { self.device.bind_buffer_memory(vk_buffer, self.vk_memory, u64::from(offset)) } {
            unsafe { self.device.destroy_buffer(vk_buffer, None) };
            return Err(GpuAllocError::BackendError(e.to_string()));
        }

        Ok(VulkanBuffer { vk_buffer, offset, size })
    }
}

/// One `VkDeviceMemory` allocation that images are bound into
pub struct VulkanTextureHeap {
    /// Raw Vulkan device memory handle
    pub vk_memory: vk::DeviceMemory,
    device: Arc<ash::Device>,
}

impl TextureHeap for VulkanTextureHeap {
    type Texture = VulkanTexture;

    fn id(&self) -> HeapId {
        HeapId(self.vk_memory.as_raw())
    }

    fn create_texture(&self, desc: &TextureDesc, offset: u32, size: u32) -> Result<VulkanTexture, GpuAllocError> {
        let vk_image = create_image(&self.device, desc)?;

        let requirements = unsafe { self.device.get_image_memory_requirements(vk_image) };
        if requirements.size > u64::from(size) || u64::from(offset) % requirements.alignment != 0 {
            unsafe { self.device.destroy_image(vk_image, None) };
            return Err(GpuAllocError::AlignmentFailed);
        }

        if let Err(e) = unsafe { self.device.bind_image_memory(vk_image, self.vk_memory, u64::from(offset)) } {
            unsafe { self.device.destroy_image(vk_image, None) };
            return Err(GpuAllocError::BackendError(e.to_string()));
        }

        Ok(VulkanTexture { vk_image, offset, size })
    }
}

/// Vulkan-based device capability
pub struct VulkanDevice {
    /// Vulkan device
    device: Arc<ash::Device>,
    /// Memory properties
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create a new Vulkan device capability
    pub fn new(device: Arc<ash::Device>, physical_device: vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self {
            device,
            memory_properties,
        }
    }

    /// The wrapped logical device
    pub fn raw(&self) -> &Arc<ash::Device> {
        &self.device
    }

    fn allocate_memory(&self, size: u32, class: MemoryClass) -> Result<vk::DeviceMemory, GpuAllocError> {
        let memory_type_index = find_memory_type(&self.memory_properties, memory_properties(class))?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(u64::from(size))
            .memory_type_index(memory_type_index);

        unsafe {
            self.device.allocate_memory(&alloc_info, None).map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GpuAllocError::OutOfMemory
                }
                other => GpuAllocError::BackendError(other.to_string()),
            })
        }
    }
}

impl GpuDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type MemoryHeap = VulkanMemoryHeap;
    type TextureHeap = VulkanTextureHeap;

    fn create_memory_heap(&self, size: u32, class: MemoryClass) -> Result<VulkanMemoryHeap, GpuAllocError> {
        if !class.is_buffer_class() {
            return Err(GpuAllocError::UnsupportedUsage);
        }
        Ok(VulkanMemoryHeap {
            vk_memory: self.allocate_memory(size, class)?,
            class,
            device: Arc::clone(&self.device),
        })
    }

    fn create_texture_heap(&self, size: u32) -> Result<VulkanTextureHeap, GpuAllocError> {
        Ok(VulkanTextureHeap {
            vk_memory: self.allocate_memory(size, MemoryClass::Texture)?,
            device: Arc::clone(&self.device),
        })
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<TextureAllocationInfo, GpuAllocError> {
        // Requirements only exist for a created image, so probe with a temporary one.
        let image = create_image(&self.device, desc)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        unsafe { self.device.destroy_image(image, None) };

        Ok(TextureAllocationInfo {
            size_bytes: u32::try_from(requirements.size).map_err(|_| GpuAllocError::InvalidSize)?,
            alignment: u32::try_from(requirements.alignment).map_err(|_| GpuAllocError::AlignmentFailed)?,
        })
    }

    fn release_buffer(&self, buffer: VulkanBuffer) {
        unsafe { self.device.destroy_buffer(buffer.vk_buffer, None) };
    }

    fn release_texture(&self, texture: VulkanTexture) {
        unsafe { self.device.destroy_image(texture.vk_image, None) };
    }

    fn release_memory_heap(&self, heap: VulkanMemoryHeap) {
        unsafe { self.device.free_memory(heap.vk_memory, None) };
    }

    fn release_texture_heap(&self, heap: VulkanTextureHeap) {
        unsafe { self.device.free_memory(heap.vk_memory, None) };
    }
}

fn create_image(device: &ash::Device, desc: &TextureDesc) -> Result<vk::Image, GpuAllocError> {
    let usage = if desc.format == TextureFormat::Depth32Float {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
    } else {
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
    };

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk_format(desc.format))
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(desc.num_mipmaps)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    unsafe {
        device
            .create_image(&image_info, None)
            .map_err(|e| GpuAllocError::BackendError(e.to_string()))
    }
}

fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

fn buffer_usage(class: MemoryClass) -> vk::BufferUsageFlags {
    match class {
        MemoryClass::Upload => {
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
        }
        MemoryClass::Device | MemoryClass::Texture => {
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
        }
    }
}

fn memory_properties(class: MemoryClass) -> vk::MemoryPropertyFlags {
    match class {
        MemoryClass::Device | MemoryClass::Texture => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryClass::Upload => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    }
}

/// Find the first memory type with all of `properties`.
// TODO: intersect with memoryTypeBits of a probe resource once heaps are created per format.
fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, GpuAllocError> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .position(|t| t.property_flags.contains(properties))
        .map(|i| i as u32)
        .ok_or(GpuAllocError::UnsupportedUsage)
}
