//! Vulkan backend for the device capability
//!
//! Heaps are single `VkDeviceMemory` allocations; buffers and images are bound
//! into them at the offsets chosen by the allocator.

pub mod device;

pub use device::{VulkanBuffer, VulkanDevice, VulkanMemoryHeap, VulkanTexture, VulkanTextureHeap};
